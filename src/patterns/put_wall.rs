use crate::config::PutWallThresholds;
use crate::delta::pc_ratio_delta;
use crate::history::HistoryWindow;
use crate::models::{DirectionalBias, PatternKind, PatternMatch, StrikeOi};

/// Elevated and rising put/call ratio with puts stacked just below the price.
#[derive(Debug, Clone)]
pub struct PutWallRule {
    min_days: usize,
    min_pc_ratio: f64,
    min_pc_increase: f64,
    oi_concentration: f64,
    strike_range: f64,
}

impl PutWallRule {
    pub fn new(thresholds: &PutWallThresholds) -> Self {
        Self {
            min_days: thresholds.min_days,
            min_pc_ratio: thresholds.min_pc_ratio,
            min_pc_increase: thresholds.min_pc_increase,
            oi_concentration: thresholds.oi_concentration,
            strike_range: thresholds.strike_range,
        }
    }

    /// The ratio increase needs at least two days to compare.
    pub fn min_days(&self) -> usize {
        self.min_days.max(2)
    }

    pub fn evaluate(&self, ticker: &str, window: &HistoryWindow) -> Option<PatternMatch> {
        let today = window.latest()?;
        let ratio = today.pc_ratio_checked().ok()?;
        if ratio < self.min_pc_ratio {
            return None;
        }
        let increase = pc_ratio_delta(window, window.len().saturating_sub(1))?;
        if increase < self.min_pc_increase {
            return None;
        }
        if today.total_put_oi == 0 {
            return None;
        }

        let price = today.underlying_price;
        let floor = price * (1.0 - self.strike_range);
        let below: Vec<&StrikeOi> = today
            .strikes
            .values()
            .filter(|row| row.strike >= floor && row.strike < price)
            .collect();
        let wall_oi: u64 = below.iter().map(|row| row.put_oi).sum();
        let concentration = wall_oi as f64 / today.total_put_oi as f64;
        if wall_oi == 0 || concentration < self.oi_concentration {
            return None;
        }

        // Strikes ascend, so replacing on ties lets the higher strike win.
        let wall = below
            .iter()
            .fold(None::<&StrikeOi>, |best, row| match best {
                Some(current) if current.put_oi > row.put_oi => Some(current),
                _ => Some(*row),
            })?;

        Some(PatternMatch {
            ticker: ticker.to_string(),
            pattern_kind: PatternKind::PutWall,
            strength: concentration.clamp(0.0, 1.0),
            window_length: window.len(),
            directional_bias: DirectionalBias::Bearish,
            key_strike: Some(wall.strike),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::test_support::day_with_strikes;

    fn rule() -> PutWallRule {
        PutWallRule::new(&PutWallThresholds::default())
    }

    fn build(put_series: &[u64], wall_share: f64) -> HistoryWindow {
        HistoryWindow::from_days(
            put_series
                .iter()
                .enumerate()
                .map(|(i, &puts)| {
                    let wall = (puts as f64 * wall_share) as u64;
                    day_with_strikes(
                        i as i64,
                        100.0,
                        &[
                            (95.0, 0, wall, 0, 0),
                            (105.0, 1_000, puts - wall, 0, 0),
                        ],
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn fires_on_rising_ratio_with_wall_below_price() {
        let window = build(&[1_200, 1_300, 1_400, 1_500, 1_600], 0.5);
        let found = rule().evaluate("SPY", &window).expect("put wall");
        assert_eq!(found.key_strike, Some(95.0));
        assert_eq!(found.window_length, 5);
        assert_eq!(found.directional_bias, DirectionalBias::Bearish);
        assert!((found.strength - 0.5).abs() < 1e-12);
    }

    #[test]
    fn ratio_below_floor_does_not_fire() {
        let window = build(&[1_000, 1_100, 1_200, 1_300, 1_400], 0.5);
        assert!(rule().evaluate("SPY", &window).is_none());
    }

    #[test]
    fn flat_ratio_does_not_fire() {
        let window = build(&[1_600; 5], 0.5);
        assert!(rule().evaluate("SPY", &window).is_none());
    }

    #[test]
    fn puts_above_price_are_not_a_wall() {
        let window = build(&[1_200, 1_300, 1_400, 1_500, 1_600], 0.1);
        assert!(rule().evaluate("SPY", &window).is_none());
    }

    #[test]
    fn undefined_ratio_inside_the_window_blocks_the_match() {
        let mut days: Vec<_> = build(&[1_200, 1_300, 1_400, 1_500, 1_600], 0.5)
            .iter()
            .cloned()
            .collect();
        days[2] = day_with_strikes(2, 100.0, &[(95.0, 0, 700, 0, 0)]);
        let window = HistoryWindow::from_days(days);
        assert_eq!(window.get(2).and_then(|d| d.pc_ratio), None);
        assert!(rule().evaluate("SPY", &window).is_none());
    }
}
