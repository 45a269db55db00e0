use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use std::path::Path;

use crate::commands::{load_history, resolve_as_of, LoadedHistory};
use crate::confidence::BlendedConfidence;
use crate::pipeline::DailyPipeline;
use crate::report::{JsonReportSink, PipelineReport, ReportSink};
use crate::run_status::RunStatus;

pub async fn run(data_file: &Path, as_of: Option<NaiveDate>, output: Option<&Path>) -> Result<()> {
    let status = RunStatus::new();
    let LoadedHistory {
        snapshot,
        config,
        store,
        ingest,
    } = load_history(data_file, &status)?;
    let as_of = resolve_as_of(&store, as_of)?;

    let confidence = BlendedConfidence::new(
        snapshot.success_rates.clone(),
        config.signals.success_rate_weight,
    );
    let pipeline = DailyPipeline::new(config, Box::new(confidence))?.with_status(status);

    let mut report = tokio::task::spawn_blocking(move || pipeline.run(&store, as_of))
        .await
        .context("Pipeline task failed to complete")??;
    // Ingestion rejections lead the exclusion list.
    let mut exclusions = ingest.rejected;
    exclusions.append(&mut report.exclusions);
    report.exclusions = exclusions;

    log_report(&report);

    if let Some(path) = output {
        let mut sink = JsonReportSink::new(path);
        sink.publish(&report)?;
        info!("Report written to {}", sink.path().display());
    }
    Ok(())
}

fn log_report(report: &PipelineReport) {
    info!(
        "Run {} for {}: {} tickers analyzed, {} pattern matches, {} clusters",
        report.run_id,
        report.as_of,
        report.analyzed_tickers,
        report.pattern_matches.len(),
        report.clusters.len()
    );
    if let Some(context) = report.market_context.as_ref() {
        info!(
            "Market context from {}: regime {:?}, fear {:?}",
            context.reference_ticker, context.regime, context.fear_level
        );
    }
    for signal in &report.signals {
        info!(
            "{} {} {} strike {:.2} exp {} ({} DTE) confidence {:.2} stop {:.2} target {:.2} cluster {}",
            signal.ticker,
            signal.action.as_str(),
            signal.pattern_kind,
            signal.strike,
            signal.expiration,
            signal.expiration_days_out,
            signal.confidence,
            signal.stop_loss,
            signal.target,
            signal.cluster_id
        );
    }
    if !report.exclusions.is_empty() {
        warn!(
            "{} exclusions across {} tickers",
            report.exclusions.len(),
            report.excluded_tickers().len()
        );
    }
}
