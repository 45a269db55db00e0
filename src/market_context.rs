use chrono::NaiveDate;
use serde::Serialize;

use crate::models::DailyAggregate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarketRegime {
    Bullish,
    Bearish,
    Sideways,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FearLevel {
    High,
    Moderate,
    Low,
    Unknown,
}

/// Volatility-index positioning on the run date. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketContext {
    pub reference_ticker: String,
    pub date: NaiveDate,
    pub pc_ratio: Option<f64>,
    pub total_call_oi: u64,
    pub total_put_oi: u64,
    pub regime: MarketRegime,
    pub fear_level: FearLevel,
}

const LOW_PC_RATIO: f64 = 0.6;
const HIGH_PC_RATIO: f64 = 1.5;
const HIGH_FEAR_CALL_SHARE: f64 = 0.6;
const LOW_FEAR_CALL_SHARE: f64 = 0.3;

/// Heavy volatility-call positioning reads as bearish for equities.
pub fn regime_from_pc_ratio(pc_ratio: Option<f64>) -> MarketRegime {
    match pc_ratio {
        None => MarketRegime::Unknown,
        Some(ratio) if ratio < LOW_PC_RATIO => MarketRegime::Bearish,
        Some(ratio) if ratio > HIGH_PC_RATIO => MarketRegime::Bullish,
        Some(_) => MarketRegime::Sideways,
    }
}

pub fn fear_from_positioning(call_oi: u64, put_oi: u64) -> FearLevel {
    let total = call_oi.saturating_add(put_oi);
    if total == 0 {
        return FearLevel::Unknown;
    }
    let call_share = call_oi as f64 / total as f64;
    if call_share > HIGH_FEAR_CALL_SHARE {
        FearLevel::High
    } else if call_share < LOW_FEAR_CALL_SHARE {
        FearLevel::Low
    } else {
        FearLevel::Moderate
    }
}

pub fn market_context(reference_ticker: &str, day: &DailyAggregate) -> MarketContext {
    MarketContext {
        reference_ticker: reference_ticker.to_string(),
        date: day.date,
        pc_ratio: day.pc_ratio,
        total_call_oi: day.total_call_oi,
        total_put_oi: day.total_put_oi,
        regime: regime_from_pc_ratio(day.pc_ratio),
        fear_level: fear_from_positioning(day.total_call_oi, day.total_put_oi),
    }
}
