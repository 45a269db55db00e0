use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPool;
use uuid::Uuid;

use crate::clustering::{
    annotate_clusters, cluster_vectors, summarize_clusters, ClusterAssignments,
};
use crate::confidence::ConfidenceModel;
use crate::config::PipelineConfig;
use crate::delta::{compute_deltas, DeltaReport};
use crate::error::{Exclusion, ExclusionKind, PipelineError, PipelineStage};
use crate::features::{extract_features, normalize_batch};
use crate::history::{HistoryStore, HistoryWindow};
use crate::market_context::{market_context, MarketContext};
use crate::models::{FeatureVector, PatternMatch};
use crate::pattern::{detect_all, PatternDetector};
use crate::report::{ActivityNote, PipelineReport};
use crate::run_status::RunStatus;
use crate::signals::{generate_signals, SignalCandidate};

/// Per-ticker output of the delta and pattern stages.
#[derive(Debug, Clone)]
pub struct TickerAnalysis {
    pub ticker: String,
    pub window: HistoryWindow,
    pub deltas: DeltaReport,
    pub matches: Vec<PatternMatch>,
}

impl TickerAnalysis {
    fn activity(&self) -> Option<ActivityNote> {
        let deltas = &self.deltas;
        if deltas.large_oi_increases.is_empty()
            && deltas.unusual_activity.is_empty()
            && deltas.new_strike_concentration.is_empty()
        {
            return None;
        }
        Some(ActivityNote {
            ticker: self.ticker.clone(),
            large_oi_increases: deltas.large_oi_increases.clone(),
            unusual_activity: deltas.unusual_activity.clone(),
            new_strike_concentration: deltas.new_strike_concentration.clone(),
            new_strikes: deltas.new_strikes.clone(),
        })
    }
}

/// Delta calculation and pattern detection for one ticker as of `as_of`.
pub fn analyze_ticker(
    store: &HistoryStore,
    ticker: &str,
    as_of: NaiveDate,
    config: &PipelineConfig,
    detectors: &[PatternDetector],
) -> TickerAnalysis {
    let window = store.window_as_of(ticker, as_of, config.history.lookback_days);
    let deltas = compute_deltas(ticker, &window, &config.delta);
    let matches = detect_all(detectors, ticker, &window, &deltas);
    TickerAnalysis {
        ticker: ticker.to_string(),
        window,
        deltas,
        matches,
    }
}

/// Runs the daily batch: analysis, features, clustering, signals.
///
/// Every run owns its intermediate state; nothing is carried between calls.
pub struct DailyPipeline {
    config: PipelineConfig,
    detectors: Vec<PatternDetector>,
    confidence: Box<dyn ConfidenceModel>,
    status: RunStatus,
    pool: ThreadPool,
}

impl DailyPipeline {
    pub fn new(config: PipelineConfig, confidence: Box<dyn ConfidenceModel>) -> Result<Self> {
        let threads = config.worker_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("oi-worker-{}", index))
            .build()
            .with_context(|| format!("Failed to build worker pool with {} threads", threads))?;
        let detectors = PatternDetector::all(&config.patterns);
        Ok(Self {
            config,
            detectors,
            confidence,
            status: RunStatus::new(),
            pool,
        })
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> RunStatus {
        self.status.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn enter_stage(&self, stage: PipelineStage) -> Result<(), PipelineError> {
        if self.status.is_cancelled() {
            warn!("Run cancelled before {} stage", stage);
            return Err(PipelineError::Cancelled { stage });
        }
        self.status.enter_stage(stage);
        Ok(())
    }

    fn is_reference(&self, ticker: &str) -> bool {
        self.config
            .reference_ticker
            .as_deref()
            .map(|reference| reference.eq_ignore_ascii_case(ticker))
            .unwrap_or(false)
    }

    /// Tradable tickers with data on `as_of`, plus exclusions for the rest.
    fn resolve_universe(
        &self,
        store: &HistoryStore,
        as_of: NaiveDate,
    ) -> Result<(Vec<String>, Vec<Exclusion>), PipelineError> {
        let universe: Vec<String> = store
            .tickers()
            .into_iter()
            .filter(|ticker| !self.is_reference(ticker))
            .collect();
        let (available, missing): (Vec<String>, Vec<String>) = universe
            .iter()
            .cloned()
            .partition(|ticker| store.has_date(ticker, as_of));

        let expected = universe.len();
        let coverage = if expected == 0 {
            0.0
        } else {
            available.len() as f64 / expected as f64
        };
        if available.is_empty() || coverage < self.config.min_universe_coverage {
            return Err(PipelineError::IncompleteUniverse {
                date: as_of,
                available: available.len(),
                expected,
            });
        }

        let exclusions = missing
            .iter()
            .map(|ticker| {
                Exclusion::new(
                    ticker,
                    PipelineStage::Ingestion,
                    ExclusionKind::MissingData,
                    format!("no observations on {}", as_of),
                )
            })
            .collect();
        Ok((available, exclusions))
    }

    pub fn run(
        &self,
        store: &HistoryStore,
        as_of: NaiveDate,
    ) -> Result<PipelineReport, PipelineError> {
        info!("Starting pipeline run for {}", as_of);
        self.enter_stage(PipelineStage::Ingestion)?;
        let (universe, mut exclusions) = self.resolve_universe(store, as_of)?;
        let universe_size = universe.len() + exclusions.len();
        self.status.set_progress(universe_size, 0, exclusions.len());

        let market_context = self.market_context(store, as_of);

        // Analysis
        self.enter_stage(PipelineStage::Analysis)?;
        let analyses: Vec<TickerAnalysis> = self.pool.install(|| {
            universe
                .par_iter()
                .map(|ticker| analyze_ticker(store, ticker, as_of, &self.config, &self.detectors))
                .collect()
        });
        let matched = analyses.iter().filter(|a| !a.matches.is_empty()).count();
        info!(
            "Analysis complete: {} tickers, {} with pattern matches",
            analyses.len(),
            matched
        );
        self.status
            .set_progress(universe_size, analyses.len(), exclusions.len());

        // Features
        self.enter_stage(PipelineStage::Features)?;
        let include_unmatched = self.config.features.include_unmatched;
        if !include_unmatched {
            for analysis in analyses.iter().filter(|a| a.matches.is_empty()) {
                exclusions.push(Exclusion::new(
                    &analysis.ticker,
                    PipelineStage::Features,
                    ExclusionKind::NoPatternMatch,
                    "no pattern matched",
                ));
            }
        }
        let extracted: Vec<Result<FeatureVector, Exclusion>> = self.pool.install(|| {
            analyses
                .par_iter()
                .filter(|a| include_unmatched || !a.matches.is_empty())
                .map(|a| extract_features(&a.ticker, &a.window, &a.deltas, &a.matches))
                .collect()
        });
        let mut raw_vectors = Vec::with_capacity(extracted.len());
        for result in extracted {
            match result {
                Ok(vector) => raw_vectors.push(vector),
                Err(exclusion) => {
                    debug!("Excluded {} from features: {}", exclusion.ticker, exclusion.detail);
                    exclusions.push(exclusion);
                }
            }
        }
        let (feature_vectors, feature_scaling) =
            normalize_batch(raw_vectors, self.config.features.normalization);
        info!("Built {} feature vectors", feature_vectors.len());

        // Clustering
        self.enter_stage(PipelineStage::Clustering)?;
        let assignments = match cluster_vectors(&feature_vectors, &self.config.clustering) {
            Ok(assignments) => assignments,
            Err(PipelineError::ClusteringInputEmpty) => {
                info!("No feature vectors to cluster; signals use ungrouped matches");
                ClusterAssignments::default()
            }
            Err(error) => return Err(error),
        };
        let matches_by_ticker: BTreeMap<String, Vec<PatternMatch>> = analyses
            .iter()
            .filter(|a| !a.matches.is_empty())
            .map(|a| (a.ticker.clone(), a.matches.clone()))
            .collect();
        let best_confidence: BTreeMap<String, f64> = matches_by_ticker
            .iter()
            .map(|(ticker, matches)| {
                let best = matches
                    .iter()
                    .map(|found| self.confidence.confidence(found))
                    .fold(0.0, f64::max);
                (ticker.clone(), best)
            })
            .collect();
        let clusters = annotate_clusters(&assignments, &matches_by_ticker, &best_confidence);
        let cluster_summary = summarize_clusters(&assignments, &matches_by_ticker);
        info!(
            "Clustering complete: {} clusters, {} noise, market bias {:?}",
            clusters.len(),
            cluster_summary.noise,
            cluster_summary.market_bias
        );

        // Signals
        self.enter_stage(PipelineStage::Signals)?;
        let candidates: Vec<SignalCandidate> = analyses
            .iter()
            .filter_map(|a| a.window.latest().map(|latest| (a, latest)))
            .flat_map(|(a, latest)| {
                let cluster_id = assignments.cluster_of(&a.ticker);
                a.matches.iter().map(move |found| SignalCandidate {
                    found,
                    latest,
                    cluster_id,
                })
            })
            .collect();
        let outcome = self.pool.install(|| {
            generate_signals(&candidates, self.confidence.as_ref(), &self.config.signals)
        });

        let mut pattern_matches: Vec<PatternMatch> =
            analyses.iter().flat_map(|a| a.matches.iter().cloned()).collect();
        pattern_matches.sort_by(|a, b| {
            a.ticker
                .cmp(&b.ticker)
                .then_with(|| a.pattern_kind.cmp(&b.pattern_kind))
        });

        self.status
            .set_progress(universe_size, analyses.len(), exclusions.len());
        self.status.set_phase("Completed");
        info!(
            "Pipeline run for {} finished: {} signals, {} exclusions",
            as_of,
            outcome.signals.len(),
            exclusions.len()
        );

        Ok(PipelineReport {
            run_id: Uuid::new_v4(),
            as_of,
            generated_at: Utc::now(),
            universe_size,
            analyzed_tickers: analyses.len(),
            confidence_model: self.confidence.name().to_string(),
            market_context,
            pattern_matches,
            activity: analyses.iter().filter_map(TickerAnalysis::activity).collect(),
            feature_vectors,
            feature_scaling,
            cluster_assignments: assignments.labels.clone(),
            clusters,
            cluster_summary,
            signals: outcome.signals,
            rejected_candidates: outcome.rejected,
            signals_over_limit: outcome.truncated,
            exclusions,
        })
    }

    fn market_context(&self, store: &HistoryStore, as_of: NaiveDate) -> Option<MarketContext> {
        let reference = self.config.reference_ticker.as_deref()?;
        let window = store.window_as_of(reference, as_of, 1);
        let context = window.latest().map(|day| market_context(reference, day));
        if context.is_none() {
            debug!("Reference ticker {} has no data up to {}", reference, as_of);
        }
        context
    }
}
