use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::config::ClusteringConfig;
use crate::error::PipelineError;
use crate::models::{
    Cluster, DirectionalBias, FeatureVector, PatternKind, PatternMatch, NOISE_CLUSTER_ID,
};

/// Cluster label for every ticker in the batch, noise included.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterAssignments {
    pub labels: BTreeMap<String, i32>,
    pub cluster_count: usize,
}

impl ClusterAssignments {
    pub fn cluster_of(&self, ticker: &str) -> i32 {
        self.labels.get(ticker).copied().unwrap_or(NOISE_CLUSTER_ID)
    }

    pub fn members(&self, cluster_id: i32) -> Vec<String> {
        self.labels
            .iter()
            .filter(|(_, label)| **label == cluster_id)
            .map(|(ticker, _)| ticker.clone())
            .collect()
    }

    pub fn noise(&self) -> Vec<String> {
        self.members(NOISE_CLUSTER_ID)
    }
}

/// Density-based clustering over the batch.
///
/// Points are visited in ticker order and neighbourhoods are listed in the
/// same order, so the partition depends only on the vector set. A point's
/// neighbourhood includes itself. Clusters left smaller than `min_samples`
/// after border points are shared out are relabelled as noise.
pub fn cluster_vectors(
    vectors: &[FeatureVector],
    config: &ClusteringConfig,
) -> Result<ClusterAssignments, PipelineError> {
    if vectors.is_empty() {
        return Err(PipelineError::ClusteringInputEmpty);
    }

    let mut ordered: Vec<&FeatureVector> = vectors.iter().collect();
    ordered.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    let n = ordered.len();

    let neighbourhoods: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| ordered[i].distance(ordered[j]) <= config.epsilon)
                .collect()
        })
        .collect();
    let is_core: Vec<bool> = neighbourhoods
        .iter()
        .map(|hood| hood.len() >= config.min_samples)
        .collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut next_cluster = 0usize;
    for start in 0..n {
        if labels[start].is_some() || !is_core[start] {
            continue;
        }
        let cluster = next_cluster;
        next_cluster += 1;
        labels[start] = Some(cluster);

        let mut queue: VecDeque<usize> = neighbourhoods[start].iter().copied().collect();
        while let Some(point) = queue.pop_front() {
            if labels[point].is_some() {
                continue;
            }
            labels[point] = Some(cluster);
            if is_core[point] {
                queue.extend(
                    neighbourhoods[point]
                        .iter()
                        .copied()
                        .filter(|&next| labels[next].is_none()),
                );
            }
        }
    }

    let mut sizes = vec![0usize; next_cluster];
    for label in labels.iter().flatten() {
        sizes[*label] += 1;
    }
    // Renumber surviving clusters densely in order of discovery.
    let mut renumbered: Vec<Option<i32>> = vec![None; next_cluster];
    let mut cluster_count = 0usize;
    for (cluster, size) in sizes.iter().enumerate() {
        if *size >= config.min_samples.max(1) {
            renumbered[cluster] = Some(cluster_count as i32);
            cluster_count += 1;
        }
    }

    let labels = ordered
        .iter()
        .zip(labels.iter())
        .map(|(vector, label)| {
            let id = label
                .and_then(|cluster| renumbered[cluster])
                .unwrap_or(NOISE_CLUSTER_ID);
            (vector.ticker.clone(), id)
        })
        .collect();

    Ok(ClusterAssignments {
        labels,
        cluster_count,
    })
}

/// Most frequent pattern kind among the matches; ties keep the earlier kind.
pub fn dominant_pattern<'a, I>(matches: I) -> Option<PatternKind>
where
    I: IntoIterator<Item = &'a PatternMatch>,
{
    let mut counts: BTreeMap<PatternKind, usize> = BTreeMap::new();
    for found in matches {
        *counts.entry(found.pattern_kind).or_default() += 1;
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(PatternKind, usize)>, (kind, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((kind, count)),
        })
        .map(|(kind, _)| kind)
}

/// Attach members, dominant pattern and mean confidence to every cluster.
///
/// `confidence` holds each ticker's best candidate confidence; tickers with
/// none count as zero.
pub fn annotate_clusters(
    assignments: &ClusterAssignments,
    matches: &BTreeMap<String, Vec<PatternMatch>>,
    confidence: &BTreeMap<String, f64>,
) -> Vec<Cluster> {
    (0..assignments.cluster_count as i32)
        .map(|cluster_id| {
            let members = assignments.members(cluster_id);
            let member_matches = members
                .iter()
                .filter_map(|ticker| matches.get(ticker))
                .flatten();
            let mean_confidence = if members.is_empty() {
                0.0
            } else {
                members
                    .iter()
                    .map(|ticker| confidence.get(ticker).copied().unwrap_or(0.0))
                    .sum::<f64>()
                    / members.len() as f64
            };
            Cluster {
                cluster_id,
                dominant_pattern: dominant_pattern(member_matches),
                members,
                mean_confidence,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarketBias {
    Bullish,
    Bearish,
    Mixed,
    Unclear,
}

/// Directional balance across clustered tickers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub clustered: usize,
    pub noise: usize,
    pub bullish: usize,
    pub bearish: usize,
    pub bullish_share: Option<f64>,
    pub dominant_bullish_pattern: Option<PatternKind>,
    pub dominant_bearish_pattern: Option<PatternKind>,
    pub market_bias: MarketBias,
}

const BULLISH_BIAS_SHARE: f64 = 0.65;
const BEARISH_BIAS_SHARE: f64 = 0.35;

/// Each clustered ticker votes with the bias of its strongest match.
pub fn summarize_clusters(
    assignments: &ClusterAssignments,
    matches: &BTreeMap<String, Vec<PatternMatch>>,
) -> ClusterSummary {
    let mut bullish_matches: Vec<&PatternMatch> = Vec::new();
    let mut bearish_matches: Vec<&PatternMatch> = Vec::new();
    let mut clustered = 0usize;
    let mut noise = 0usize;

    for (ticker, label) in &assignments.labels {
        if *label == NOISE_CLUSTER_ID {
            noise += 1;
            continue;
        }
        clustered += 1;
        let best = matches
            .get(ticker)
            .and_then(|found| crate::pattern::best_match(found));
        match best.map(|found| found.directional_bias) {
            Some(DirectionalBias::Bullish) => bullish_matches.extend(best),
            Some(DirectionalBias::Bearish) => bearish_matches.extend(best),
            None => {}
        }
    }

    let bullish = bullish_matches.len();
    let bearish = bearish_matches.len();
    let directional = bullish + bearish;
    let bullish_share = (directional > 0).then(|| bullish as f64 / directional as f64);
    let market_bias = match bullish_share {
        None => MarketBias::Unclear,
        Some(share) if share > BULLISH_BIAS_SHARE => MarketBias::Bullish,
        Some(share) if share < BEARISH_BIAS_SHARE => MarketBias::Bearish,
        Some(_) => MarketBias::Mixed,
    };

    ClusterSummary {
        clustered,
        noise,
        bullish,
        bearish,
        bullish_share,
        dominant_bullish_pattern: dominant_pattern(bullish_matches),
        dominant_bearish_pattern: dominant_pattern(bearish_matches),
        market_bias,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(ticker: &str, x: f64, y: f64) -> FeatureVector {
        FeatureVector {
            ticker: ticker.to_string(),
            oi_change_7d: x,
            pc_ratio_change: y,
            consecutive_days: 0.0,
            acceleration_rate: 0.0,
        }
    }

    fn matched(ticker: &str, kind: PatternKind, bias: DirectionalBias) -> PatternMatch {
        PatternMatch {
            ticker: ticker.to_string(),
            pattern_kind: kind,
            strength: 0.9,
            window_length: 5,
            directional_bias: bias,
            key_strike: None,
        }
    }

    #[test]
    fn empty_batch_short_circuits() {
        assert_eq!(
            cluster_vectors(&[], &ClusteringConfig::default()),
            Err(PipelineError::ClusteringInputEmpty)
        );
    }

    #[test]
    fn three_identical_vectors_form_one_cluster() {
        let vectors = vec![
            vector("AAA", 0.0, 0.0),
            vector("BBB", 0.0, 0.0),
            vector("CCC", 0.0, 0.0),
        ];
        let result = cluster_vectors(&vectors, &ClusteringConfig::default()).unwrap();
        assert_eq!(result.cluster_count, 1);
        assert!(result.noise().is_empty());
        assert_eq!(result.members(0), vec!["AAA", "BBB", "CCC"]);

        // Two identical vectors alone are not dense enough.
        let result = cluster_vectors(&vectors[..2], &ClusteringConfig::default()).unwrap();
        assert_eq!(result.cluster_count, 0);
        assert_eq!(result.noise().len(), 2);
    }

    #[test]
    fn separates_dense_groups_from_outliers() {
        let vectors = vec![
            vector("A1", 0.0, 0.0),
            vector("A2", 0.1, 0.0),
            vector("A3", 0.0, 0.1),
            vector("B1", 5.0, 5.0),
            vector("B2", 5.1, 5.0),
            vector("B3", 5.0, 5.1),
            vector("ZZ", -9.0, 9.0),
        ];
        let result = cluster_vectors(&vectors, &ClusteringConfig::default()).unwrap();
        assert_eq!(result.cluster_count, 2);
        assert_eq!(result.cluster_of("A2"), 0);
        assert_eq!(result.cluster_of("B3"), 1);
        assert_eq!(result.noise(), vec!["ZZ"]);
    }

    #[test]
    fn partition_is_independent_of_input_order() {
        let mut vectors = vec![
            vector("D", 0.0, 0.0),
            vector("A", 0.3, 0.0),
            vector("C", 0.6, 0.0),
            vector("B", 0.9, 0.0),
            vector("E", 1.2, 0.0),
            vector("F", 4.0, 0.0),
        ];
        let config = ClusteringConfig::default();
        let first = cluster_vectors(&vectors, &config).unwrap();
        let again = cluster_vectors(&vectors, &config).unwrap();
        vectors.reverse();
        let reversed = cluster_vectors(&vectors, &config).unwrap();
        assert_eq!(first, again);
        assert_eq!(first, reversed);
        assert_eq!(first.noise(), vec!["F"]);
    }

    #[test]
    fn annotates_dominant_pattern_and_mean_confidence() {
        let vectors = vec![
            vector("AAA", 0.0, 0.0),
            vector("BBB", 0.0, 0.0),
            vector("CCC", 0.0, 0.0),
        ];
        let assignments = cluster_vectors(&vectors, &ClusteringConfig::default()).unwrap();
        let mut matches = BTreeMap::new();
        matches.insert(
            "AAA".to_string(),
            vec![matched("AAA", PatternKind::PutWall, DirectionalBias::Bearish)],
        );
        matches.insert(
            "BBB".to_string(),
            vec![
                matched("BBB", PatternKind::Accumulation, DirectionalBias::Bullish),
                matched("BBB", PatternKind::GammaSqueeze, DirectionalBias::Bullish),
            ],
        );
        matches.insert(
            "CCC".to_string(),
            vec![matched("CCC", PatternKind::Accumulation, DirectionalBias::Bullish)],
        );
        let confidence: BTreeMap<String, f64> = [("AAA", 0.6), ("BBB", 0.9), ("CCC", 0.9)]
            .iter()
            .map(|(t, c)| (t.to_string(), *c))
            .collect();

        let clusters = annotate_clusters(&assignments, &matches, &confidence);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].dominant_pattern, Some(PatternKind::Accumulation));
        assert!((clusters[0].mean_confidence - 0.8).abs() < 1e-12);

        let summary = summarize_clusters(&assignments, &matches);
        assert_eq!(summary.bullish, 2);
        assert_eq!(summary.bearish, 1);
        assert_eq!(summary.market_bias, MarketBias::Bullish);
        assert_eq!(summary.dominant_bearish_pattern, Some(PatternKind::PutWall));
    }

    #[test]
    fn no_directional_members_is_unclear() {
        let summary = summarize_clusters(&ClusterAssignments::default(), &BTreeMap::new());
        assert_eq!(summary.market_bias, MarketBias::Unclear);
        assert_eq!(summary.bullish_share, None);
    }
}
