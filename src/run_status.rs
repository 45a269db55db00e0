use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::PipelineStage;

/// Shared view of a pipeline run, safe to hand to another thread.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    stage: Option<PipelineStage>,
    total_tickers: usize,
    processed_tickers: usize,
    excluded_tickers: usize,
}

#[derive(Clone, Debug)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub stage: Option<PipelineStage>,
    pub total_tickers: usize,
    pub processed_tickers: usize,
    pub excluded_tickers: usize,
    pub cancelled: bool,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn enter_stage(&self, stage: PipelineStage) {
        if let Ok(mut data) = self.inner.lock() {
            data.stage = Some(stage);
            data.phase = format!("Running {} stage", stage);
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_tickers: usize,
        processed_tickers: usize,
        excluded_tickers: usize,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_tickers = total_tickers;
            data.processed_tickers = processed_tickers;
            data.excluded_tickers = excluded_tickers;
        }
    }

    /// Request that the run stop at the next stage boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        let cancelled = self.is_cancelled();
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                stage: data.stage,
                total_tickers: data.total_tickers,
                processed_tickers: data.processed_tickers,
                excluded_tickers: data.excluded_tickers,
                cancelled,
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                stage: None,
                total_tickers: 0,
                processed_tickers: 0,
                excluded_tickers: 0,
                cancelled,
            }
        }
    }
}
