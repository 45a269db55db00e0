use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::{REFERENCE_TICKER_KEY, SETTING_KEYS};
use crate::error::{Exclusion, PipelineStage};
use crate::history::HistoryStore;
use crate::models::{OiObservation, PatternKind};
use crate::run_status::RunStatus;

const OI_SNAPSHOT_VERSION: u32 = 1;

/// Everything one pipeline run consumes from upstream, in a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OiSnapshot {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub observations: Vec<OiObservation>,
    /// Historical hit rate per pattern kind, when a backtest store supplied one.
    #[serde(default)]
    pub success_rates: HashMap<PatternKind, f64>,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl OiSnapshot {
    pub fn new(observations: Vec<OiObservation>) -> Self {
        Self {
            version: OI_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            observations,
            success_rates: HashMap::new(),
            settings: HashMap::new(),
        }
    }

    pub fn tickers(&self) -> BTreeSet<String> {
        self.observations
            .iter()
            .map(|o| o.ticker.trim().to_uppercase())
            .collect()
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.observations.iter().map(|o| o.date).collect()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P, status: &RunStatus) -> Result<Self> {
        let path = path.as_ref();
        status.set_phase(format!("Loading OI snapshot from {}", path.display()));
        let file = File::open(path)
            .with_context(|| format!("Failed to open OI snapshot at {}", path.display()))?;
        let reader = BufReader::new(file);
        let snapshot: OiSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != OI_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "OI snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                OI_SNAPSHOT_VERSION
            ));
        }
        info!(
            "Loaded {} observations for {} tickers from {}",
            snapshot.observations.len(),
            snapshot.tickers().len(),
            path.display()
        );
        Ok(snapshot)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create OI snapshot at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let snapshot = OiSnapshot {
            version: OI_SNAPSHOT_VERSION,
            generated_at: self.generated_at,
            observations: self.observations.clone(),
            success_rates: self.success_rates.clone(),
            settings: scrub_snapshot_settings(&self.settings),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize OI snapshot")?;
        writer
            .flush()
            .context("Failed to flush OI snapshot to disk")?;
        Ok(())
    }

    /// Read a JSON array of observations.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open observation file {}", path.display()))?;
        let observations: Vec<OiObservation> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid observation JSON in {}", path.display()))?;
        Ok(Self::new(observations))
    }
}

/// Keep only recognised setting keys.
fn scrub_snapshot_settings(settings: &HashMap<String, String>) -> HashMap<String, String> {
    settings
        .iter()
        .filter(|(key, _)| {
            SETTING_KEYS.contains(&key.as_str()) || key.as_str() == REFERENCE_TICKER_KEY
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Outcome of feeding a batch of observations into the store.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: Vec<Exclusion>,
}

/// Append observations in file order. Rows the store rejects, including
/// out-of-order dates, are recorded and skipped; the batch always completes.
pub fn ingest(store: &mut HistoryStore, observations: &[OiObservation]) -> IngestSummary {
    let mut summary = IngestSummary::default();
    for observation in observations {
        match store.append(observation) {
            Ok(()) => summary.accepted += 1,
            Err(error) => {
                warn!("Rejected observation: {}", error);
                summary.rejected.push(Exclusion::from_error(
                    &observation.ticker,
                    PipelineStage::Ingestion,
                    &error,
                ));
            }
        }
    }
    info!(
        "Ingested {} observations ({} rejected) across {} tickers",
        summary.accepted,
        summary.rejected.len(),
        store.tickers().len()
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExclusionKind;
    use chrono::Duration;

    fn observation(ticker: &str, day: i64, strike: f64, call_oi: i64) -> OiObservation {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(day);
        OiObservation {
            date,
            ticker: ticker.to_string(),
            strike,
            expiration: date + Duration::days(60),
            call_oi,
            put_oi: 50,
            call_volume: 5,
            put_volume: 5,
            underlying_price: 100.0,
        }
    }

    #[test]
    fn ingest_rejects_out_of_order_and_invalid_rows() {
        let mut store = HistoryStore::new(100);
        let observations = vec![
            observation("AAA", 1, 100.0, 10),
            observation("AAA", 0, 100.0, 10),
            observation("AAA", 1, 105.0, -3),
            observation("BBB", 0, 100.0, 10),
        ];
        let summary = ingest(&mut store, &observations);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected.len(), 2);
        assert!(summary
            .rejected
            .iter()
            .all(|rejected| rejected.kind == ExclusionKind::DataIntegrity
                && rejected.stage == PipelineStage::Ingestion));
        assert!(summary.rejected[0].detail.contains("out-of-order"));
        assert_eq!(store.day_count("AAA"), 1);
        assert_eq!(store.day_count("BBB"), 1);
    }

    #[test]
    fn snapshot_file_round_trip_keeps_known_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("oi.bin");

        let mut snapshot = OiSnapshot::new(vec![observation("AAA", 0, 100.0, 10)]);
        snapshot.success_rates.insert(PatternKind::PutWall, 0.55);
        snapshot
            .settings
            .insert("MIN_CONFIDENCE".to_string(), "0.8".to_string());
        snapshot
            .settings
            .insert("API_SECRET".to_string(), "hunter2".to_string());
        snapshot.save_to_file(&path).unwrap();

        let loaded = OiSnapshot::load_from_file(&path, &RunStatus::new()).unwrap();
        assert_eq!(loaded.observations, snapshot.observations);
        assert_eq!(loaded.success_rates.get(&PatternKind::PutWall), Some(&0.55));
        assert_eq!(loaded.settings.len(), 1);
        assert!(loaded.settings.contains_key("MIN_CONFIDENCE"));
    }

    #[test]
    fn reads_json_observations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oi.json");
        let rows = vec![observation("AAA", 0, 100.0, 10), observation("AAA", 0, 110.0, 20)];
        fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();

        let snapshot = OiSnapshot::from_json_file(&path).unwrap();
        assert_eq!(snapshot.observations.len(), 2);
        assert_eq!(snapshot.tickers().len(), 1);
    }
}
