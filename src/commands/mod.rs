pub mod generate_sample;
pub mod import_json;
pub mod inspect;
pub mod run;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::path::Path;

use crate::config::PipelineConfig;
use crate::history::HistoryStore;
use crate::run_status::RunStatus;
use crate::snapshot::{ingest, IngestSummary, OiSnapshot};

/// A snapshot replayed into a fresh history store.
pub struct LoadedHistory {
    pub snapshot: OiSnapshot,
    pub config: PipelineConfig,
    pub store: HistoryStore,
    pub ingest: IngestSummary,
}

/// Load a snapshot, resolve config (snapshot settings, then environment) and
/// replay every observation into a history store.
pub fn load_history(data_file: &Path, status: &RunStatus) -> Result<LoadedHistory> {
    let snapshot = OiSnapshot::load_from_file(data_file, status)?;
    let config = PipelineConfig::from_settings_map(&snapshot.settings)?.with_env_overrides()?;
    status.set_phase("Replaying observations into history store");
    let mut store = HistoryStore::new(config.history.horizon_days);
    let ingest = ingest(&mut store, &snapshot.observations);
    Ok(LoadedHistory {
        snapshot,
        config,
        store,
        ingest,
    })
}

pub fn resolve_as_of(store: &HistoryStore, as_of: Option<NaiveDate>) -> Result<NaiveDate> {
    match as_of {
        Some(date) => Ok(date),
        None => store
            .latest_date_overall()
            .ok_or_else(|| anyhow!("Snapshot contains no usable observations")),
    }
}
