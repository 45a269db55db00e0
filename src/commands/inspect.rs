use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;

use crate::commands::load_history;
use crate::delta::compute_deltas;
use crate::history::normalize_ticker_symbol;
use crate::pattern::{detect_all, PatternDetector};
use crate::run_status::RunStatus;

pub async fn run(data_file: &Path, ticker: &str, days: Option<usize>) -> Result<()> {
    let ticker =
        normalize_ticker_symbol(ticker).ok_or_else(|| anyhow!("Ticker symbol is empty"))?;
    let loaded = load_history(data_file, &RunStatus::new())?;
    let days = days.unwrap_or(loaded.config.history.lookback_days);
    let window = loaded.store.window(&ticker, days);
    if window.is_empty() {
        return Err(anyhow!("No history for {} in {}", ticker, data_file.display()));
    }

    info!("{} days of history for {}", window.len(), ticker);
    for day in window.iter() {
        info!(
            "{} price {:.2} calls {} puts {} pc_ratio {} max_pain {} strikes {}",
            day.date,
            day.underlying_price,
            day.total_call_oi,
            day.total_put_oi,
            day.pc_ratio
                .map(|ratio| format!("{:.3}", ratio))
                .unwrap_or_else(|| "n/a".to_string()),
            day.max_pain
                .map(|strike| format!("{:.2}", strike))
                .unwrap_or_else(|| "n/a".to_string()),
            day.strikes.len()
        );
    }

    let deltas = compute_deltas(&ticker, &window, &loaded.config.delta);
    info!(
        "Delta report:\n{}",
        serde_json::to_string_pretty(&deltas)?
    );

    let detectors = PatternDetector::all(&loaded.config.patterns);
    let matches = detect_all(&detectors, &ticker, &window, &deltas);
    if matches.is_empty() {
        info!("No patterns matched for {}", ticker);
    }
    for found in matches {
        info!(
            "{} matched: strength {:.3}, {} days, {:?}",
            found.pattern_kind, found.strength, found.window_length, found.directional_bias
        );
    }
    Ok(())
}
