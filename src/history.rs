use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::NaiveDate;
use log::debug;

use crate::error::PipelineError;
use crate::models::{strike_key, DailyAggregate, OiObservation, StrikeOi};

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Immutable, oldest-first view over a ticker's most recent days.
///
/// Days are shared with the store; later appends copy-on-write the open day,
/// so a window never changes after it has been handed out.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    days: Vec<Arc<DailyAggregate>>,
}

impl HistoryWindow {
    pub fn from_days(days: Vec<DailyAggregate>) -> Self {
        Self {
            days: days.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn latest(&self) -> Option<&DailyAggregate> {
        self.days.last().map(Arc::as_ref)
    }

    /// Aggregate `n` trading days before the latest one (`0` is the latest).
    pub fn days_back(&self, n: usize) -> Option<&DailyAggregate> {
        let len = self.days.len();
        if n >= len {
            None
        } else {
            Some(self.days[len - 1 - n].as_ref())
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DailyAggregate> + '_ {
        self.days.iter().map(Arc::as_ref)
    }

    pub fn get(&self, index: usize) -> Option<&DailyAggregate> {
        self.days.get(index).map(Arc::as_ref)
    }

    pub fn ensure_min_days(&self, need: usize) -> Result<(), PipelineError> {
        if self.days.len() < need {
            Err(PipelineError::InsufficientHistory {
                need,
                got: self.days.len(),
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct TickerHistory {
    days: VecDeque<Arc<DailyAggregate>>,
}

impl TickerHistory {
    fn last_date(&self) -> Option<NaiveDate> {
        self.days.back().map(|day| day.date)
    }
}

/// Bounded per-ticker OI history, one aggregate per trading day.
#[derive(Debug)]
pub struct HistoryStore {
    horizon_days: usize,
    histories: BTreeMap<String, TickerHistory>,
}

impl HistoryStore {
    pub fn new(horizon_days: usize) -> Self {
        Self {
            horizon_days: horizon_days.max(1),
            histories: BTreeMap::new(),
        }
    }

    /// Validate one observation and fold it into its ticker's daily aggregate.
    ///
    /// Dates must be non-decreasing per ticker and each (strike, expiration)
    /// may be recorded once per day.
    pub fn append(&mut self, observation: &OiObservation) -> Result<(), PipelineError> {
        let ticker = normalize_ticker_symbol(&observation.ticker).ok_or_else(|| {
            integrity_error(observation, "ticker symbol is empty".to_string())
        })?;
        validate_fields(observation)?;

        let horizon = self.horizon_days;
        let history = self.histories.entry(ticker.clone()).or_default();

        if let Some(last_date) = history.last_date() {
            if observation.date < last_date {
                return Err(integrity_error(
                    observation,
                    format!("out-of-order date; history already at {}", last_date),
                ));
            }
        }

        let key = strike_key(observation.strike);
        let contract = (key, observation.expiration);
        let starts_new_day = history.last_date() != Some(observation.date);

        if !starts_new_day {
            if let Some(open_day) = history.days.back() {
                if open_day.contracts.contains(&contract) {
                    return Err(integrity_error(
                        observation,
                        format!(
                            "duplicate contract strike {} expiring {}",
                            observation.strike, observation.expiration
                        ),
                    ));
                }
            }
        }

        if starts_new_day {
            history.days.push_back(Arc::new(DailyAggregate::new(
                &ticker,
                observation.date,
                observation.underlying_price,
            )));
            while history.days.len() > horizon {
                if let Some(evicted) = history.days.pop_front() {
                    debug!("Evicted {} {} beyond {}-day horizon", ticker, evicted.date, horizon);
                }
            }
        }

        let Some(open_day) = history.days.back_mut() else {
            return Err(integrity_error(observation, "no open day".to_string()));
        };
        let day = Arc::make_mut(open_day);
        merge_observation(day, observation, contract)
    }

    /// The most recent `n` days for `ticker`, oldest first.
    pub fn window(&self, ticker: &str, n: usize) -> HistoryWindow {
        let Some(history) = normalize_ticker_symbol(ticker).and_then(|t| self.histories.get(&t))
        else {
            return HistoryWindow::default();
        };
        let start = history.days.len().saturating_sub(n);
        HistoryWindow {
            days: history.days.iter().skip(start).cloned().collect(),
        }
    }

    /// Window ending on `date` (inclusive), ignoring any later days.
    pub fn window_as_of(&self, ticker: &str, date: NaiveDate, n: usize) -> HistoryWindow {
        let Some(history) = normalize_ticker_symbol(ticker).and_then(|t| self.histories.get(&t))
        else {
            return HistoryWindow::default();
        };
        let end = history.days.partition_point(|day| day.date <= date);
        let start = end.saturating_sub(n);
        HistoryWindow {
            days: history.days.range(start..end).cloned().collect(),
        }
    }

    /// Known tickers in lexicographic order.
    pub fn tickers(&self) -> Vec<String> {
        self.histories.keys().cloned().collect()
    }

    pub fn has_date(&self, ticker: &str, date: NaiveDate) -> bool {
        normalize_ticker_symbol(ticker)
            .and_then(|t| self.histories.get(&t))
            .map(|h| h.days.iter().any(|day| day.date == date))
            .unwrap_or(false)
    }

    pub fn day_count(&self, ticker: &str) -> usize {
        normalize_ticker_symbol(ticker)
            .and_then(|t| self.histories.get(&t))
            .map(|h| h.days.len())
            .unwrap_or(0)
    }

    /// Most recent date present across every ticker.
    pub fn latest_date_overall(&self) -> Option<NaiveDate> {
        self.histories
            .values()
            .filter_map(TickerHistory::last_date)
            .max()
    }
}

fn integrity_error(observation: &OiObservation, reason: String) -> PipelineError {
    PipelineError::DataIntegrity {
        ticker: observation.ticker.clone(),
        date: observation.date,
        reason,
    }
}

fn validate_fields(observation: &OiObservation) -> Result<(), PipelineError> {
    let counts = [
        ("call_oi", observation.call_oi),
        ("put_oi", observation.put_oi),
        ("call_volume", observation.call_volume),
        ("put_volume", observation.put_volume),
    ];
    for (field, value) in counts {
        if value < 0 {
            return Err(integrity_error(
                observation,
                format!("{} is negative ({})", field, value),
            ));
        }
    }
    if !observation.underlying_price.is_finite() || observation.underlying_price <= 0.0 {
        return Err(integrity_error(
            observation,
            format!(
                "underlying_price must be positive ({})",
                observation.underlying_price
            ),
        ));
    }
    if !observation.strike.is_finite() || observation.strike <= 0.0 {
        return Err(integrity_error(
            observation,
            format!("strike must be positive ({})", observation.strike),
        ));
    }
    if observation.expiration < observation.date {
        return Err(integrity_error(
            observation,
            format!("expiration {} precedes observation date", observation.expiration),
        ));
    }
    Ok(())
}

/// Every sum is checked before anything is written, so a rejected row leaves
/// the open day as it was.
fn merge_observation(
    day: &mut DailyAggregate,
    observation: &OiObservation,
    contract: (i64, NaiveDate),
) -> Result<(), PipelineError> {
    // Counts were validated non-negative above.
    let call_oi = observation.call_oi as u64;
    let put_oi = observation.put_oi as u64;
    let call_volume = observation.call_volume as u64;
    let put_volume = observation.put_volume as u64;

    let add = |total: u64, value: u64, field: &str| {
        total.checked_add(value).ok_or_else(|| {
            integrity_error(
                observation,
                format!("{} total overflows at strike {}", field, observation.strike),
            )
        })
    };

    let existing = day.strikes.get(&contract.0);
    let row = StrikeOi {
        strike: existing.map_or(observation.strike, |r| r.strike),
        call_oi: add(existing.map_or(0, |r| r.call_oi), call_oi, "call_oi")?,
        put_oi: add(existing.map_or(0, |r| r.put_oi), put_oi, "put_oi")?,
        call_volume: add(existing.map_or(0, |r| r.call_volume), call_volume, "call_volume")?,
        put_volume: add(existing.map_or(0, |r| r.put_volume), put_volume, "put_volume")?,
    };
    let total_call_oi = add(day.total_call_oi, call_oi, "call_oi")?;
    let total_put_oi = add(day.total_put_oi, put_oi, "put_oi")?;
    let total_call_volume = add(day.total_call_volume, call_volume, "call_volume")?;
    let total_put_volume = add(day.total_put_volume, put_volume, "put_volume")?;

    day.strikes.insert(contract.0, row);
    day.total_call_oi = total_call_oi;
    day.total_put_oi = total_put_oi;
    day.total_call_volume = total_call_volume;
    day.total_put_volume = total_put_volume;
    day.underlying_price = observation.underlying_price;
    day.expirations.insert(observation.expiration);
    day.contracts.insert(contract);
    day.refresh_derived();
    Ok(())
}
