use anyhow::Result;
use log::info;
use std::path::Path;

use crate::snapshot::OiSnapshot;

pub async fn run(input: &Path, output: &Path) -> Result<()> {
    info!("Converting {} to OI snapshot", input.display());
    let snapshot = OiSnapshot::from_json_file(input)?;
    snapshot.save_to_file(output)?;
    info!(
        "Snapshot with {} observations written to {}",
        snapshot.observations.len(),
        output.display()
    );
    Ok(())
}
