use crate::config::StreakThresholds;
use crate::delta::DeltaReport;
use crate::models::{DirectionalBias, PatternKind, PatternMatch};
use crate::pattern::{streak_strength, trailing_streak};

/// Consecutive days of rising call open interest.
#[derive(Debug, Clone)]
pub struct AccumulationRule {
    min_days: usize,
    min_increase: f64,
}

impl AccumulationRule {
    pub fn new(thresholds: &StreakThresholds) -> Self {
        Self {
            min_days: thresholds.min_days,
            min_increase: thresholds.min_increase,
        }
    }

    /// A streak of `min_days` changes needs one extra day to measure from.
    pub fn min_days(&self) -> usize {
        self.min_days + 1
    }

    pub fn evaluate(&self, ticker: &str, deltas: &DeltaReport) -> Option<PatternMatch> {
        let streak = trailing_streak(deltas.daily_call_changes.iter(), |change| {
            change.filter(|pct| *pct > 0.0)
        });

        if streak.days < self.min_days || streak.cumulative <= self.min_increase {
            return None;
        }

        Some(PatternMatch {
            ticker: ticker.to_string(),
            pattern_kind: PatternKind::Accumulation,
            strength: streak_strength(streak.cumulative, self.min_increase),
            window_length: streak.days,
            directional_bias: DirectionalBias::Bullish,
            key_strike: None,
        })
    }
}
