use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::PatternKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Ingestion,
    Analysis,
    Features,
    Clustering,
    Signals,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Ingestion => "ingestion",
            PipelineStage::Analysis => "analysis",
            PipelineStage::Features => "features",
            PipelineStage::Clustering => "clustering",
            PipelineStage::Signals => "signals",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("data integrity violation for {ticker} on {date}: {reason}")]
    DataIntegrity {
        ticker: String,
        date: NaiveDate,
        reason: String,
    },

    #[error("insufficient history: need {need} days, got {got}")]
    InsufficientHistory { need: usize, got: usize },

    #[error("put/call ratio undefined for {ticker} on {date}: call OI is zero")]
    UndefinedRatio { ticker: String, date: NaiveDate },

    #[error("no feature vectors available for clustering")]
    ClusteringInputEmpty,

    #[error("no listed expiration for {ticker} within {min_dte}-{max_dte} DTE (+/- {tolerance} days)")]
    NoExpirationInBand {
        ticker: String,
        min_dte: i64,
        max_dte: i64,
        tolerance: i64,
    },

    #[error("ticker universe incomplete for {date}: {available}/{expected} tickers have data")]
    IncompleteUniverse {
        date: NaiveDate,
        available: usize,
        expected: usize,
    },

    #[error("pipeline run cancelled before {stage} stage")]
    Cancelled { stage: PipelineStage },
}

impl PipelineError {
    /// Only an unusable universe or an explicit cancellation stops a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::IncompleteUniverse { .. } | PipelineError::Cancelled { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusionKind {
    MissingData,
    DataIntegrity,
    InsufficientHistory,
    UndefinedRatio,
    NoPatternMatch,
    BelowConfidence,
    NoExpirationInBand,
}

impl ExclusionKind {
    pub fn from_error(error: &PipelineError) -> Self {
        match error {
            PipelineError::DataIntegrity { .. } => ExclusionKind::DataIntegrity,
            PipelineError::InsufficientHistory { .. } => ExclusionKind::InsufficientHistory,
            PipelineError::UndefinedRatio { .. } => ExclusionKind::UndefinedRatio,
            PipelineError::NoExpirationInBand { .. } => ExclusionKind::NoExpirationInBand,
            PipelineError::ClusteringInputEmpty
            | PipelineError::IncompleteUniverse { .. }
            | PipelineError::Cancelled { .. } => ExclusionKind::MissingData,
        }
    }
}

/// A ticker dropped from a stage, with the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exclusion {
    pub ticker: String,
    pub stage: PipelineStage,
    pub kind: ExclusionKind,
    pub detail: String,
}

impl Exclusion {
    pub fn new<S: Into<String>>(
        ticker: &str,
        stage: PipelineStage,
        kind: ExclusionKind,
        detail: S,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            stage,
            kind,
            detail: detail.into(),
        }
    }

    pub fn from_error(ticker: &str, stage: PipelineStage, error: &PipelineError) -> Self {
        Self::new(ticker, stage, ExclusionKind::from_error(error), error.to_string())
    }
}

/// A signal candidate that never made it into the ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedCandidate {
    pub ticker: String,
    pub pattern_kind: PatternKind,
    pub confidence: f64,
    pub kind: ExclusionKind,
    pub detail: String,
}
