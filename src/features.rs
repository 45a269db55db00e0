use serde::Serialize;
use statrs::statistics::Statistics;

use crate::config::Normalization;
use crate::delta::{pc_ratio_delta, percentage_change, DeltaReport};
use crate::error::{Exclusion, ExclusionKind, PipelineStage};
use crate::history::HistoryWindow;
use crate::models::{FeatureVector, PatternKind, PatternMatch};

const EPSILON: f64 = 1e-12;
const OI_CHANGE_SPAN: usize = 7;

/// Per-dimension shift and scale applied to one run's batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureScaling {
    pub method: &'static str,
    pub center: [f64; FeatureVector::DIMENSIONS],
    pub scale: [f64; FeatureVector::DIMENSIONS],
}

/// Raw (unnormalized) vector for one ticker.
///
/// The 7-day OI change falls back to the longest span the window offers. A
/// ticker with a single day, or zero total OI at the start of the span, is
/// excluded rather than given a made-up value.
pub fn extract_features(
    ticker: &str,
    window: &HistoryWindow,
    deltas: &DeltaReport,
    matches: &[PatternMatch],
) -> Result<FeatureVector, Exclusion> {
    let span = OI_CHANGE_SPAN.min(window.len().saturating_sub(1));
    if span == 0 {
        return Err(Exclusion::new(
            ticker,
            PipelineStage::Features,
            ExclusionKind::InsufficientHistory,
            format!("need 2 days for OI change, got {}", window.len()),
        ));
    }

    let (Some(latest), Some(start)) = (window.latest(), window.days_back(span)) else {
        return Err(Exclusion::new(
            ticker,
            PipelineStage::Features,
            ExclusionKind::MissingData,
            "window is empty",
        ));
    };
    let oi_change = percentage_change(start.total_oi() as f64, latest.total_oi() as f64)
        .ok_or_else(|| {
            Exclusion::new(
                ticker,
                PipelineStage::Features,
                ExclusionKind::MissingData,
                format!("zero total OI on {}", start.date),
            )
        })?;

    // Only streak patterns measure consecutive days; PutWall and GammaSqueeze
    // report their evaluation span instead.
    let consecutive_days = matches
        .iter()
        .filter(|found| {
            matches!(
                found.pattern_kind,
                PatternKind::Accumulation | PatternKind::Distribution
            )
        })
        .map(|found| found.window_length)
        .max()
        .unwrap_or(0);

    Ok(FeatureVector {
        ticker: ticker.to_string(),
        oi_change_7d: oi_change,
        pc_ratio_change: pc_ratio_delta(window, span).unwrap_or(0.0),
        consecutive_days: consecutive_days as f64,
        acceleration_rate: deltas.acceleration.unwrap_or(0.0),
    })
}

/// Rescale every dimension across the whole batch. Dimensions with no spread
/// collapse to zero. The batch is returned sorted by ticker.
pub fn normalize_batch(
    mut vectors: Vec<FeatureVector>,
    method: Normalization,
) -> (Vec<FeatureVector>, Option<FeatureScaling>) {
    vectors.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    if vectors.is_empty() {
        return (vectors, None);
    }

    let mut center = [0.0; FeatureVector::DIMENSIONS];
    let mut scale = [0.0; FeatureVector::DIMENSIONS];
    for dim in 0..FeatureVector::DIMENSIONS {
        let column: Vec<f64> = vectors.iter().map(|v| v.values()[dim]).collect();
        let (c, s) = match method {
            Normalization::ZScore => {
                let mean = column.iter().mean();
                let std_dev = column.iter().population_std_dev();
                (mean, if std_dev.is_finite() { std_dev } else { 0.0 })
            }
            Normalization::MinMax => {
                let low = column.iter().copied().fold(f64::INFINITY, f64::min);
                let high = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (low, high - low)
            }
        };
        center[dim] = c;
        scale[dim] = s;
    }

    let rescale = |value: f64, dim: usize| -> f64 {
        if scale[dim] <= EPSILON {
            0.0
        } else {
            (value - center[dim]) / scale[dim]
        }
    };
    for vector in vectors.iter_mut() {
        vector.oi_change_7d = rescale(vector.oi_change_7d, 0);
        vector.pc_ratio_change = rescale(vector.pc_ratio_change, 1);
        vector.consecutive_days = rescale(vector.consecutive_days, 2);
        vector.acceleration_rate = rescale(vector.acceleration_rate, 3);
    }

    let scaling = FeatureScaling {
        method: match method {
            Normalization::ZScore => "zscore",
            Normalization::MinMax => "minmax",
        },
        center,
        scale,
    };
    (vectors, Some(scaling))
}
