use anyhow::Result;
use log::info;
use std::path::Path;

use crate::sample::{generate_observations, SampleConfig};
use crate::snapshot::OiSnapshot;

pub async fn run(output: &Path, tickers: usize, days: usize, seed: u64) -> Result<()> {
    let config = SampleConfig {
        tickers,
        days,
        seed,
        ..SampleConfig::default()
    };
    let snapshot = OiSnapshot::new(generate_observations(&config));
    snapshot.save_to_file(output)?;
    info!(
        "Synthetic snapshot ({} tickers, {} days, seed {}) with {} observations written to {}",
        tickers,
        days,
        seed,
        snapshot.observations.len(),
        output.display()
    );
    Ok(())
}
