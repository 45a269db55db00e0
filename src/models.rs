use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::PipelineError;

pub const NOISE_CLUSTER_ID: i32 = -1;

/// A single strike/expiration row from a daily open-interest snapshot.
///
/// Counts are signed so that malformed upstream rows can be represented and
/// rejected by the history store instead of silently wrapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OiObservation {
    pub date: NaiveDate,
    pub ticker: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub call_oi: i64,
    pub put_oi: i64,
    pub call_volume: i64,
    pub put_volume: i64,
    pub underlying_price: f64,
}

/// Strike prices are keyed in cents so they can live in ordered maps.
pub fn strike_key(strike: f64) -> i64 {
    (strike * 100.0).round() as i64
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrikeOi {
    pub strike: f64,
    pub call_oi: u64,
    pub put_oi: u64,
    pub call_volume: u64,
    pub put_volume: u64,
}

/// Per-day roll-up of every observation recorded for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub ticker: String,
    pub underlying_price: f64,
    pub total_call_oi: u64,
    pub total_put_oi: u64,
    pub total_call_volume: u64,
    pub total_put_volume: u64,
    /// `None` when the day's total call OI is zero.
    pub pc_ratio: Option<f64>,
    pub max_pain: Option<f64>,
    pub strikes: BTreeMap<i64, StrikeOi>,
    pub expirations: BTreeSet<NaiveDate>,
    #[serde(skip)]
    pub(crate) contracts: BTreeSet<(i64, NaiveDate)>,
}

impl DailyAggregate {
    pub fn new(ticker: &str, date: NaiveDate, underlying_price: f64) -> Self {
        Self {
            date,
            ticker: ticker.to_string(),
            underlying_price,
            total_call_oi: 0,
            total_put_oi: 0,
            total_call_volume: 0,
            total_put_volume: 0,
            pc_ratio: None,
            max_pain: None,
            strikes: BTreeMap::new(),
            expirations: BTreeSet::new(),
            contracts: BTreeSet::new(),
        }
    }

    pub fn total_oi(&self) -> u64 {
        self.total_call_oi.saturating_add(self.total_put_oi)
    }

    pub fn strike(&self, strike: f64) -> Option<&StrikeOi> {
        self.strikes.get(&strike_key(strike))
    }

    pub fn listed_strikes(&self) -> impl Iterator<Item = f64> + '_ {
        self.strikes.values().map(|s| s.strike)
    }

    pub fn pc_ratio_checked(&self) -> Result<f64, PipelineError> {
        self.pc_ratio.ok_or_else(|| PipelineError::UndefinedRatio {
            ticker: self.ticker.clone(),
            date: self.date,
        })
    }

    /// Listed strike closest to `price`; ties go to the lower strike.
    pub fn nearest_strike(&self, price: f64) -> Option<f64> {
        self.listed_strikes()
            .min_by(|a, b| (a - price).abs().total_cmp(&(b - price).abs()))
    }

    pub(crate) fn refresh_derived(&mut self) {
        self.pc_ratio = compute_pc_ratio(self.total_put_oi, self.total_call_oi);
        self.max_pain = compute_max_pain(&self.strikes);
    }
}

pub fn compute_pc_ratio(put_oi: u64, call_oi: u64) -> Option<f64> {
    if call_oi == 0 {
        None
    } else {
        Some(put_oi as f64 / call_oi as f64)
    }
}

/// Strike at which the total intrinsic value owed to option holders is lowest.
/// Ties resolve to the lower strike.
///
/// Single pass over the ascending strikes: calls below the settle price and
/// puts above it are tracked as running contract counts and strike-weighted
/// sums, so each candidate's payout is `K*calls_below - call_w + put_w - K*puts_above`.
pub fn compute_max_pain(strikes: &BTreeMap<i64, StrikeOi>) -> Option<f64> {
    let mut calls_below = 0.0;
    let mut call_weighted = 0.0;
    let mut puts_above: f64 = strikes.values().map(|s| s.put_oi as f64).sum();
    let mut put_weighted: f64 = strikes
        .values()
        .map(|s| s.put_oi as f64 * s.strike)
        .sum();

    let mut best: Option<(f64, f64)> = None;
    for row in strikes.values() {
        let settle = row.strike;
        let pain = settle * calls_below - call_weighted + put_weighted - settle * puts_above;
        match best {
            Some((_, best_pain)) if pain >= best_pain => {}
            _ => best = Some((settle, pain)),
        }
        calls_below += row.call_oi as f64;
        call_weighted += row.call_oi as f64 * settle;
        puts_above -= row.put_oi as f64;
        put_weighted -= row.put_oi as f64 * settle;
    }
    best.map(|(strike, _)| strike)
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PatternKind {
    Accumulation,
    Distribution,
    GammaSqueeze,
    PutWall,
}

impl PatternKind {
    pub const ALL: [PatternKind; 4] = [
        PatternKind::Accumulation,
        PatternKind::Distribution,
        PatternKind::GammaSqueeze,
        PatternKind::PutWall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Accumulation => "accumulation",
            PatternKind::Distribution => "distribution",
            PatternKind::GammaSqueeze => "gamma_squeeze",
            PatternKind::PutWall => "put_wall",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectionalBias {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub ticker: String,
    pub pattern_kind: PatternKind,
    pub strength: f64,
    pub window_length: usize,
    pub directional_bias: DirectionalBias,
    /// Strike the pattern is anchored on (e.g. the put wall), when it has one.
    pub key_strike: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub ticker: String,
    pub oi_change_7d: f64,
    pub pc_ratio_change: f64,
    pub consecutive_days: f64,
    pub acceleration_rate: f64,
}

impl FeatureVector {
    pub const DIMENSIONS: usize = 4;

    pub fn values(&self) -> [f64; Self::DIMENSIONS] {
        [
            self.oi_change_7d,
            self.pc_ratio_change,
            self.consecutive_days,
            self.acceleration_rate,
        ]
    }

    pub fn distance(&self, other: &FeatureVector) -> f64 {
        self.values()
            .iter()
            .zip(other.values().iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: i32,
    pub members: Vec<String>,
    pub dominant_pattern: Option<PatternKind>,
    pub mean_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    BuyCall,
    BuyPut,
}

impl SignalAction {
    pub fn from_bias(bias: DirectionalBias) -> Self {
        match bias {
            DirectionalBias::Bullish => SignalAction::BuyCall,
            DirectionalBias::Bearish => SignalAction::BuyPut,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::BuyCall => "buy_call",
            SignalAction::BuyPut => "buy_put",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryZone {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub ticker: String,
    pub action: SignalAction,
    pub pattern_kind: PatternKind,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub expiration_days_out: i64,
    pub confidence: f64,
    pub entry_zone: EntryZone,
    pub stop_loss: f64,
    pub target: f64,
    pub position_size: f64,
    pub cluster_id: i32,
}
