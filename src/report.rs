use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::clustering::ClusterSummary;
use crate::delta::{LargeBlock, UnusualActivity};
use crate::error::{Exclusion, RejectedCandidate};
use crate::features::FeatureScaling;
use crate::market_context::MarketContext;
use crate::models::{Cluster, FeatureVector, PatternMatch, Signal};

/// Notable positioning changes for one ticker on the run date.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityNote {
    pub ticker: String,
    pub large_oi_increases: Vec<LargeBlock>,
    pub unusual_activity: Vec<UnusualActivity>,
    pub new_strike_concentration: Vec<f64>,
    pub new_strikes: Vec<f64>,
}

/// Everything a run hands to the reporting side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub universe_size: usize,
    pub analyzed_tickers: usize,
    pub confidence_model: String,
    pub market_context: Option<MarketContext>,
    pub pattern_matches: Vec<PatternMatch>,
    pub activity: Vec<ActivityNote>,
    pub feature_vectors: Vec<FeatureVector>,
    pub feature_scaling: Option<FeatureScaling>,
    pub cluster_assignments: BTreeMap<String, i32>,
    pub clusters: Vec<Cluster>,
    pub cluster_summary: ClusterSummary,
    pub signals: Vec<Signal>,
    pub rejected_candidates: Vec<RejectedCandidate>,
    pub signals_over_limit: usize,
    pub exclusions: Vec<Exclusion>,
}

impl PipelineReport {
    pub fn excluded_tickers(&self) -> Vec<&str> {
        let mut tickers: Vec<&str> = self.exclusions.iter().map(|e| e.ticker.as_str()).collect();
        tickers.sort_unstable();
        tickers.dedup();
        tickers
    }
}

/// Downstream consumer of finished reports.
pub trait ReportSink {
    fn publish(&mut self, report: &PipelineReport) -> Result<()>;
}

/// Writes each report as pretty-printed JSON to a fixed path.
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportSink {
    fn publish(&mut self, report: &PipelineReport) -> Result<()> {
        let path = self.path.as_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create report directory {}", parent.display())
                })?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Unable to create report at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report)
            .context("Failed to serialize pipeline report")?;
        writer
            .flush()
            .context("Failed to flush pipeline report to disk")?;
        Ok(())
    }
}

/// Collects reports in memory.
#[derive(Default)]
pub struct MemoryReportSink {
    pub reports: Vec<PipelineReport>,
}

impl ReportSink for MemoryReportSink {
    fn publish(&mut self, report: &PipelineReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}
