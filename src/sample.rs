use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::OiObservation;

const SAMPLE_SYMBOLS: [&str; 12] = [
    "AAPL", "AMZN", "GOOGL", "META", "MSFT", "NVDA", "TSLA", "AMD", "NFLX", "JPM", "XOM", "SPY",
];
const STRIKES_PER_SIDE: i32 = 6;
const TREND_DAYS: usize = 8;
const EXPIRATION_TARGETS: [(i64, f64); 3] = [(30, 0.3), (65, 0.5), (95, 0.2)];

#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub tickers: usize,
    pub days: usize,
    pub seed: u64,
    pub start: NaiveDate,
    /// Also emit a volatility reference ticker.
    pub reference_ticker: Option<String>,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            tickers: 20,
            days: 40,
            seed: 42,
            start: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default(),
            reference_ticker: Some("VIX".to_string()),
        }
    }
}

/// Positioning story a synthetic ticker tells over its final days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Regime {
    Quiet,
    Accumulation,
    Distribution,
    GammaSqueeze,
    PutWall,
}

const REGIMES: [Regime; 5] = [
    Regime::Accumulation,
    Regime::Distribution,
    Regime::GammaSqueeze,
    Regime::PutWall,
    Regime::Quiet,
];

pub fn sample_symbol(index: usize) -> String {
    SAMPLE_SYMBOLS
        .get(index)
        .map(|symbol| symbol.to_string())
        .unwrap_or_else(|| format!("TKR{:03}", index))
}

/// Consecutive weekdays starting at `start`.
pub fn business_days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(count);
    let mut date = start;
    while days.len() < count {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(date);
        }
        date += Duration::days(1);
    }
    days
}

fn next_friday(date: NaiveDate) -> NaiveDate {
    let mut date = date;
    while date.weekday() != Weekday::Fri {
        date += Duration::days(1);
    }
    date
}

fn strike_step(price: f64) -> f64 {
    ((price * 0.025) * 2.0).round().max(1.0) / 2.0
}

struct TickerState {
    symbol: String,
    regime: Regime,
    price: f64,
    call_total: f64,
    put_total: f64,
}

impl TickerState {
    fn advance(&mut self, rng: &mut StdRng, trending: bool) {
        self.price *= 1.0 + rng.gen_range(-0.01..=0.01);
        let (call_drift, put_drift) = match (self.regime, trending) {
            (Regime::Accumulation, true) => {
                (rng.gen_range(0.04..=0.05), rng.gen_range(-0.01..=0.01))
            }
            (Regime::Distribution, true) => {
                (rng.gen_range(-0.02..=-0.01), rng.gen_range(0.05..=0.06))
            }
            (Regime::PutWall, true) => (rng.gen_range(-0.02..=-0.01), rng.gen_range(0.06..=0.08)),
            _ => (rng.gen_range(-0.02..=0.02), rng.gen_range(-0.02..=0.02)),
        };
        self.call_total *= 1.0 + call_drift;
        self.put_total *= 1.0 + put_drift;
    }

    fn call_weight(&self, offset: i32) -> f64 {
        let base = (-(offset.abs() as f64) / 3.0).exp();
        if self.regime == Regime::GammaSqueeze && offset.abs() <= 1 {
            base * 4.0
        } else {
            base
        }
    }

    fn put_weight(&self, offset: i32) -> f64 {
        let base = (-(offset.abs() as f64) / 3.0).exp();
        if self.regime == Regime::PutWall && (-3..=-1).contains(&offset) {
            base * 6.0
        } else {
            base
        }
    }
}

/// Observations for a seeded synthetic universe. The same config always
/// produces the same rows.
pub fn generate_observations(config: &SampleConfig) -> Vec<OiObservation> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut states: Vec<TickerState> = (0..config.tickers)
        .map(|index| {
            let regime = REGIMES[index % REGIMES.len()];
            let call_total = rng.gen_range(4_000.0..=40_000.0);
            let put_ratio = match regime {
                Regime::PutWall => rng.gen_range(1.2..=1.4),
                _ => rng.gen_range(0.5..=1.0),
            };
            TickerState {
                symbol: sample_symbol(index),
                regime,
                price: rng.gen_range(20.0..=500.0),
                call_total,
                put_total: call_total * put_ratio,
            }
        })
        .collect();
    if let Some(reference) = config.reference_ticker.as_ref() {
        let call_total = rng.gen_range(50_000.0..=150_000.0);
        states.push(TickerState {
            symbol: reference.clone(),
            regime: Regime::Quiet,
            price: rng.gen_range(12.0..=30.0),
            call_total,
            put_total: call_total * rng.gen_range(0.4..=1.8),
        });
    }

    let dates = business_days(config.start, config.days);
    let trend_start = config.days.saturating_sub(TREND_DAYS);
    let mut observations = Vec::new();
    for (day_index, date) in dates.iter().enumerate() {
        let trending = day_index >= trend_start;
        for state in states.iter_mut() {
            if day_index > 0 {
                state.advance(&mut rng, trending);
            }
            push_day(&mut observations, &mut rng, state, *date, trending);
        }
    }
    observations
}

fn push_day(
    observations: &mut Vec<OiObservation>,
    rng: &mut StdRng,
    state: &TickerState,
    date: NaiveDate,
    trending: bool,
) {
    let step = strike_step(state.price);
    let center = (state.price / step).round() * step;
    let offsets = -STRIKES_PER_SIDE..=STRIKES_PER_SIDE;
    let call_norm: f64 = offsets.clone().map(|k| state.call_weight(k)).sum();
    let put_norm: f64 = offsets.clone().map(|k| state.put_weight(k)).sum();

    for offset in offsets {
        let strike = center + offset as f64 * step;
        if strike <= 0.0 {
            continue;
        }
        let strike_calls = state.call_total * state.call_weight(offset) / call_norm;
        let strike_puts = state.put_total * state.put_weight(offset) / put_norm;
        let squeezing = state.regime == Regime::GammaSqueeze && trending && offset.abs() <= 1;

        for (days_out, share) in EXPIRATION_TARGETS {
            let call_oi = (strike_calls * share).round();
            let put_oi = (strike_puts * share).round();
            let call_turnover = if squeezing {
                rng.gen_range(1.5..=2.5)
            } else {
                rng.gen_range(0.05..=0.2)
            };
            observations.push(OiObservation {
                date,
                ticker: state.symbol.clone(),
                strike,
                expiration: next_friday(date + Duration::days(days_out)),
                call_oi: call_oi as i64,
                put_oi: put_oi as i64,
                call_volume: (call_oi * call_turnover).round() as i64,
                put_volume: (put_oi * rng.gen_range(0.05..=0.2)).round() as i64,
                underlying_price: (state.price * 100.0).round() / 100.0,
            });
        }
    }
}
