use crate::config::StreakThresholds;
use crate::delta::DeltaReport;
use crate::models::{DirectionalBias, PatternKind, PatternMatch};
use crate::pattern::{streak_strength, trailing_streak};

/// Call open interest flat or falling while puts build, day after day.
///
/// The cumulative figure is the sum of the daily put OI increases over the
/// running streak.
#[derive(Debug, Clone)]
pub struct DistributionRule {
    min_days: usize,
    min_increase: f64,
}

impl DistributionRule {
    pub fn new(thresholds: &StreakThresholds) -> Self {
        Self {
            min_days: thresholds.min_days,
            min_increase: thresholds.min_increase,
        }
    }

    pub fn min_days(&self) -> usize {
        self.min_days + 1
    }

    pub fn evaluate(&self, ticker: &str, deltas: &DeltaReport) -> Option<PatternMatch> {
        let daily = deltas
            .daily_call_changes
            .iter()
            .zip(deltas.daily_put_changes.iter());
        let streak = trailing_streak(daily, |(call, put)| match (call, put) {
            (Some(call), Some(put)) if *call <= 0.0 && *put > 0.0 => Some(*put),
            _ => None,
        });

        if streak.days < self.min_days || streak.cumulative <= self.min_increase {
            return None;
        }

        Some(PatternMatch {
            ticker: ticker.to_string(),
            pattern_kind: PatternKind::Distribution,
            strength: streak_strength(streak.cumulative, self.min_increase),
            window_length: streak.days,
            directional_bias: DirectionalBias::Bearish,
            key_strike: None,
        })
    }
}
