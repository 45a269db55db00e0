use chrono::NaiveDate;
use serde::Serialize;

use crate::config::DeltaConfig;
use crate::history::HistoryWindow;
use crate::models::{strike_key, DailyAggregate};

pub const HORIZONS: [usize; 4] = [1, 3, 7, 30];

/// Change metrics measured `n` trading days back from the latest day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HorizonChanges {
    pub d1: Option<f64>,
    pub d3: Option<f64>,
    pub d7: Option<f64>,
    pub d30: Option<f64>,
}

impl HorizonChanges {
    fn from_fn<F>(mut measure: F) -> Self
    where
        F: FnMut(usize) -> Option<f64>,
    {
        Self {
            d1: measure(HORIZONS[0]),
            d3: measure(HORIZONS[1]),
            d7: measure(HORIZONS[2]),
            d30: measure(HORIZONS[3]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptionSide {
    Call,
    Put,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LargeBlock {
    pub side: OptionSide,
    pub strike: f64,
    pub oi_increase: u64,
    pub current_oi: u64,
    pub previous_oi: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UnusualActivity {
    PcRatioShift { shift: f64 },
    MaxPainShift { shift: f64 },
    TotalOiChange { pct_change: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaReport {
    pub ticker: String,
    pub as_of: Option<NaiveDate>,
    pub days: usize,
    pub call_oi_change: HorizonChanges,
    pub put_oi_change: HorizonChanges,
    pub total_oi_change: HorizonChanges,
    pub pc_ratio_delta: HorizonChanges,
    pub max_pain_migration: HorizonChanges,
    /// Day-over-day change in the 3-day total OI percentage change.
    pub acceleration: Option<f64>,
    pub new_strike_concentration: Vec<f64>,
    pub new_strikes: Vec<f64>,
    pub large_oi_increases: Vec<LargeBlock>,
    pub unusual_activity: Vec<UnusualActivity>,
    /// Entry `i` is the change from day `i` to day `i + 1` of the window.
    pub daily_call_changes: Vec<Option<f64>>,
    pub daily_put_changes: Vec<Option<f64>>,
}

/// `(curr - prev) / prev`, undefined when `prev` is zero.
pub fn percentage_change(prev: f64, curr: f64) -> Option<f64> {
    if prev == 0.0 || !prev.is_finite() || !curr.is_finite() {
        None
    } else {
        Some((curr - prev) / prev)
    }
}

fn horizon_change<F>(window: &HistoryWindow, n: usize, value: F) -> Option<f64>
where
    F: Fn(&DailyAggregate) -> f64,
{
    let latest = window.latest()?;
    let past = window.days_back(n)?;
    if n == 0 {
        return None;
    }
    percentage_change(value(past), value(latest))
}

/// pc_ratio today minus `n` days ago. Undefined if any day in the span has an
/// undefined ratio.
pub fn pc_ratio_delta(window: &HistoryWindow, n: usize) -> Option<f64> {
    if n == 0 || n >= window.len() {
        return None;
    }
    let mut latest = None;
    let mut earliest = None;
    for back in 0..=n {
        let ratio = window.days_back(back)?.pc_ratio?;
        if back == 0 {
            latest = Some(ratio);
        }
        if back == n {
            earliest = Some(ratio);
        }
    }
    Some(latest? - earliest?)
}

fn max_pain_migration(window: &HistoryWindow, n: usize) -> Option<f64> {
    if n == 0 {
        return None;
    }
    let today = window.latest()?.max_pain?;
    let past = window.days_back(n)?.max_pain?;
    Some(today - past)
}

fn daily_changes<F>(window: &HistoryWindow, value: F) -> Vec<Option<f64>>
where
    F: Fn(&DailyAggregate) -> f64,
{
    let days: Vec<&DailyAggregate> = window.iter().collect();
    days.windows(2)
        .map(|pair| percentage_change(value(pair[0]), value(pair[1])))
        .collect()
}

/// Three-day total-OI change ending `offset` days before the latest day.
fn three_day_change_at(window: &HistoryWindow, offset: usize) -> Option<f64> {
    let end = window.days_back(offset)?;
    let start = window.days_back(offset + 3)?;
    percentage_change(start.total_oi() as f64, end.total_oi() as f64)
}

pub fn acceleration(window: &HistoryWindow) -> Option<f64> {
    let today = three_day_change_at(window, 0)?;
    let yesterday = three_day_change_at(window, 1)?;
    Some(today - yesterday)
}

/// Both thresholds are exclusive: OI must exceed them.
fn is_concentrated(day: &DailyAggregate, strike_oi: u64, config: &DeltaConfig) -> bool {
    if strike_oi > config.concentration_abs_threshold {
        return true;
    }
    let total = day.total_oi();
    total > 0 && strike_oi as f64 / total as f64 > config.concentration_rel_threshold
}

/// Strikes concentrated today that were not concentrated `lookback` days ago.
fn new_strike_concentration(window: &HistoryWindow, config: &DeltaConfig) -> Vec<f64> {
    let (Some(today), Some(past)) = (
        window.latest(),
        window.days_back(config.concentration_lookback.max(1)),
    ) else {
        return Vec::new();
    };

    today
        .strikes
        .values()
        .filter(|row| is_concentrated(today, row.call_oi.saturating_add(row.put_oi), config))
        .filter(|row| {
            let past_oi = past
                .strike(row.strike)
                .map(|p| p.call_oi.saturating_add(p.put_oi))
                .unwrap_or(0);
            !is_concentrated(past, past_oi, config)
        })
        .map(|row| row.strike)
        .collect()
}

fn new_strikes(today: &DailyAggregate, previous: &DailyAggregate) -> Vec<f64> {
    today
        .strikes
        .iter()
        .filter(|(key, _)| !previous.strikes.contains_key(key))
        .map(|(_, row)| row.strike)
        .collect()
}

fn large_oi_increases(
    today: &DailyAggregate,
    previous: &DailyAggregate,
    threshold: u64,
) -> Vec<LargeBlock> {
    let mut blocks = Vec::new();
    for row in today.strikes.values() {
        let prior = previous.strikes.get(&strike_key(row.strike));
        let sides = [
            (OptionSide::Call, row.call_oi, prior.map(|p| p.call_oi).unwrap_or(0)),
            (OptionSide::Put, row.put_oi, prior.map(|p| p.put_oi).unwrap_or(0)),
        ];
        for (side, current_oi, previous_oi) in sides {
            let increase = current_oi.saturating_sub(previous_oi);
            if increase >= threshold && increase > 0 {
                blocks.push(LargeBlock {
                    side,
                    strike: row.strike,
                    oi_increase: increase,
                    current_oi,
                    previous_oi,
                });
            }
        }
    }
    blocks
}

fn unusual_activity(window: &HistoryWindow, config: &DeltaConfig) -> Vec<UnusualActivity> {
    let mut flags = Vec::new();
    if let Some(shift) = pc_ratio_delta(window, 1) {
        if shift.abs() > config.unusual_pc_shift {
            flags.push(UnusualActivity::PcRatioShift { shift });
        }
    }
    if let Some(shift) = max_pain_migration(window, 1) {
        if shift.abs() > config.unusual_max_pain_shift {
            flags.push(UnusualActivity::MaxPainShift { shift });
        }
    }
    if let Some(pct_change) = horizon_change(window, 1, |d| d.total_oi() as f64) {
        if pct_change.abs() > config.unusual_total_oi_change {
            flags.push(UnusualActivity::TotalOiChange { pct_change });
        }
    }
    flags
}

/// Derive every change metric for one ticker's window. Pure: the same window
/// always yields the same report.
pub fn compute_deltas(ticker: &str, window: &HistoryWindow, config: &DeltaConfig) -> DeltaReport {
    let (new_strikes, large_oi_increases) = match (window.latest(), window.days_back(1)) {
        (Some(today), Some(previous)) => (
            new_strikes(today, previous),
            large_oi_increases(today, previous, config.large_block_threshold),
        ),
        _ => (Vec::new(), Vec::new()),
    };

    DeltaReport {
        ticker: ticker.to_string(),
        as_of: window.latest().map(|d| d.date),
        days: window.len(),
        call_oi_change: HorizonChanges::from_fn(|n| {
            horizon_change(window, n, |d| d.total_call_oi as f64)
        }),
        put_oi_change: HorizonChanges::from_fn(|n| {
            horizon_change(window, n, |d| d.total_put_oi as f64)
        }),
        total_oi_change: HorizonChanges::from_fn(|n| {
            horizon_change(window, n, |d| d.total_oi() as f64)
        }),
        pc_ratio_delta: HorizonChanges::from_fn(|n| pc_ratio_delta(window, n)),
        max_pain_migration: HorizonChanges::from_fn(|n| max_pain_migration(window, n)),
        acceleration: acceleration(window),
        new_strike_concentration: new_strike_concentration(window, config),
        new_strikes,
        large_oi_increases,
        unusual_activity: unusual_activity(window, config),
        daily_call_changes: daily_changes(window, |d| d.total_call_oi as f64),
        daily_put_changes: daily_changes(window, |d| d.total_put_oi as f64),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn percentage_change_is_undefined_for_zero_base() {
        assert_eq!(percentage_change(0.0, 10.0), None);
        assert!((percentage_change(100.0, 110.0).unwrap() - 0.10).abs() < 1e-12);
    }

    #[test]
    fn computes_horizon_changes() {
        let calls: Vec<u64> = (0..8).map(|i| 100 + i * 10).collect();
        let puts = vec![50; 8];
        let window = window_from_series(&calls, &puts);
        let report = compute_deltas("TEST", &window, &DeltaConfig::default());

        assert!((report.call_oi_change.d1.unwrap() - (170.0 - 160.0) / 160.0).abs() < 1e-12);
        assert!((report.call_oi_change.d7.unwrap() - 0.70).abs() < 1e-12);
        assert_eq!(report.call_oi_change.d30, None);
        assert_eq!(report.put_oi_change.d3, Some(0.0));
        assert_eq!(report.daily_call_changes.len(), 7);
    }

    #[test]
    fn pc_ratio_delta_skips_spans_with_undefined_ratio() {
        // Day 2 has zero call OI.
        let window = window_from_series(&[100, 100, 0, 100, 100], &[100, 120, 120, 150, 160]);
        let report = compute_deltas("TEST", &window, &DeltaConfig::default());

        assert_eq!(window.get(2).unwrap().pc_ratio, None);
        assert!((report.pc_ratio_delta.d1.unwrap() - 0.10).abs() < 1e-12);
        assert_eq!(report.pc_ratio_delta.d3, None);
    }

    #[test]
    fn detects_large_blocks_new_strikes_and_concentration() {
        let yesterday = day_with_strikes(0, 100.0, &[(100.0, 500, 500, 0, 0)]);
        let today = day_with_strikes(
            1,
            100.0,
            &[(100.0, 6_000, 500, 0, 0), (110.0, 2_000, 0, 0, 0)],
        );
        let window = HistoryWindow::from_days(vec![yesterday, today]);
        let report = compute_deltas("TEST", &window, &DeltaConfig::default());

        assert_eq!(report.new_strikes, vec![110.0]);
        assert_eq!(report.large_oi_increases.len(), 1);
        assert_eq!(report.large_oi_increases[0].side, OptionSide::Call);
        assert_eq!(report.large_oi_increases[0].oi_increase, 5_500);
        assert_eq!(report.new_strike_concentration, vec![110.0]);
        assert!(report
            .unusual_activity
            .iter()
            .any(|flag| matches!(flag, UnusualActivity::TotalOiChange { .. })));
    }

    #[test]
    fn concentration_thresholds_must_be_exceeded() {
        let yesterday = day_with_strikes(0, 100.0, &[(110.0, 9_000, 0, 0, 0)]);
        // Strike 100 sits exactly on both thresholds: 1000 contracts, 10% of OI.
        let today = day_with_strikes(
            1,
            100.0,
            &[(100.0, 1_000, 0, 0, 0), (110.0, 9_000, 0, 0, 0)],
        );
        let window = HistoryWindow::from_days(vec![yesterday, today]);
        let report = compute_deltas("TEST", &window, &DeltaConfig::default());
        assert!(report.new_strike_concentration.is_empty());
        assert_eq!(report.new_strikes, vec![100.0]);
    }

    #[test]
    fn acceleration_tracks_change_in_three_day_rate() {
        let calls = [100, 100, 100, 100, 200];
        let window = window_from_series(&calls, &[0; 5]);
        let accel = acceleration(&window).unwrap();
        // 3-day change today is +100%, yesterday 0%.
        assert!((accel - 1.0).abs() < 1e-12);
    }

    #[test]
    fn repeated_computation_is_identical() {
        let window = window_from_series(&[100, 110, 121, 133], &[80, 70, 90, 95]);
        let config = DeltaConfig::default();
        assert_eq!(
            compute_deltas("TEST", &window, &config),
            compute_deltas("TEST", &window, &config)
        );
    }
}
