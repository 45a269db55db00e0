use crate::config::GammaSqueezeThresholds;
use crate::history::HistoryWindow;
use crate::models::{DirectionalBias, PatternKind, PatternMatch};

/// Call OI piled up near the money with heavy turnover on those strikes.
#[derive(Debug, Clone)]
pub struct GammaSqueezeRule {
    min_days: usize,
    oi_concentration: f64,
    strike_range: f64,
    min_volume_oi_ratio: f64,
}

impl GammaSqueezeRule {
    pub fn new(thresholds: &GammaSqueezeThresholds) -> Self {
        Self {
            min_days: thresholds.min_days,
            oi_concentration: thresholds.oi_concentration,
            strike_range: thresholds.strike_range,
            min_volume_oi_ratio: thresholds.min_volume_oi_ratio,
        }
    }

    pub fn min_days(&self) -> usize {
        self.min_days.max(1)
    }

    pub fn evaluate(&self, ticker: &str, window: &HistoryWindow) -> Option<PatternMatch> {
        let today = window.latest()?;
        if today.total_call_oi == 0 {
            return None;
        }

        let price = today.underlying_price;
        let low = price * (1.0 - self.strike_range);
        let high = price * (1.0 + self.strike_range);
        let (near_call_oi, near_call_volume) = today
            .strikes
            .values()
            .filter(|row| row.strike >= low && row.strike <= high)
            .fold((0u64, 0u64), |(oi, volume), row| {
                (oi + row.call_oi, volume + row.call_volume)
            });
        if near_call_oi == 0 {
            return None;
        }

        let concentration = near_call_oi as f64 / today.total_call_oi as f64;
        let volume_oi_ratio = near_call_volume as f64 / near_call_oi as f64;
        if concentration < self.oi_concentration || volume_oi_ratio <= self.min_volume_oi_ratio {
            return None;
        }

        Some(PatternMatch {
            ticker: ticker.to_string(),
            pattern_kind: PatternKind::GammaSqueeze,
            strength: concentration.clamp(0.0, 1.0),
            window_length: self.min_days(),
            directional_bias: DirectionalBias::Bullish,
            key_strike: today.nearest_strike(price),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::test_support::day_with_strikes;

    fn rule() -> GammaSqueezeRule {
        GammaSqueezeRule::new(&GammaSqueezeThresholds::default())
    }

    #[test]
    fn fires_on_concentrated_active_calls() {
        let window = HistoryWindow::from_days(vec![day_with_strikes(
            0,
            100.0,
            &[
                (90.0, 1_000, 500, 10, 0),
                (100.0, 3_000, 200, 4_000, 0),
                (120.0, 1_000, 0, 10, 0),
            ],
        )]);
        let found = rule().evaluate("NVDA", &window).expect("gamma squeeze");
        assert!((found.strength - 0.6).abs() < 1e-12);
        assert_eq!(found.key_strike, Some(100.0));
        assert_eq!(found.directional_bias, DirectionalBias::Bullish);
    }

    #[test]
    fn low_turnover_does_not_fire() {
        let window = HistoryWindow::from_days(vec![day_with_strikes(
            0,
            100.0,
            &[(100.0, 3_000, 0, 3_000, 0), (130.0, 1_000, 0, 0, 0)],
        )]);
        // Volume equals OI, which is not strictly above the 1.0 ratio.
        assert!(rule().evaluate("NVDA", &window).is_none());
    }

    #[test]
    fn dispersed_calls_do_not_fire() {
        let window = HistoryWindow::from_days(vec![day_with_strikes(
            0,
            100.0,
            &[
                (100.0, 200, 0, 5_000, 0),
                (80.0, 1_000, 0, 0, 0),
                (130.0, 1_000, 0, 0, 0),
            ],
        )]);
        assert!(rule().evaluate("NVDA", &window).is_none());
    }

    #[test]
    fn zero_call_oi_yields_no_match() {
        let window =
            HistoryWindow::from_days(vec![day_with_strikes(0, 100.0, &[(100.0, 0, 500, 0, 0)])]);
        assert!(rule().evaluate("NVDA", &window).is_none());
    }
}
