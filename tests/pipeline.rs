use anyhow::{anyhow, Context, Result};
use oi_engine::commands::{generate_sample, import_json, run};
use oi_engine::confidence::BlendedConfidence;
use oi_engine::config::PipelineConfig;
use oi_engine::history::HistoryStore;
use oi_engine::models::{PatternKind, SignalAction};
use oi_engine::pipeline::DailyPipeline;
use oi_engine::report::{MemoryReportSink, ReportSink};
use oi_engine::sample::{generate_observations, SampleConfig};
use oi_engine::snapshot::{ingest, OiSnapshot};
use serde_json::Value;
use std::fs;
use std::sync::Once;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn sample_config() -> SampleConfig {
    SampleConfig {
        tickers: 10,
        days: 40,
        seed: 42,
        ..SampleConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_command_writes_ranked_report() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let data_path = dir.path().join("oi.bin");
    let report_path = dir.path().join("reports").join("run.json");

    generate_sample::run(&data_path, 10, 40, 42).await?;
    run::run(&data_path, None, Some(&report_path)).await?;

    let report: Value = serde_json::from_str(
        &fs::read_to_string(&report_path).context("report file missing")?,
    )?;
    let signals = report["signals"]
        .as_array()
        .ok_or_else(|| anyhow!("signals missing from report"))?;
    assert!(!signals.is_empty());
    assert!(signals.len() <= PipelineConfig::default().signals.max_positions);

    let confidences: Vec<f64> = signals
        .iter()
        .filter_map(|signal| signal["confidence"].as_f64())
        .collect();
    assert_eq!(confidences.len(), signals.len());
    assert!(confidences.windows(2).all(|pair| pair[0] >= pair[1]));
    assert!(confidences.iter().all(|c| (0.7..=1.0).contains(c)));

    assert!(signals.iter().any(|signal| signal["ticker"] == "AAPL"
        && signal["patternKind"] == "Accumulation"
        && signal["action"] == "BuyCall"));
    assert!(signals.iter().all(|signal| signal["ticker"] != "VIX"));
    assert_eq!(report["marketContext"]["referenceTicker"], "VIX");
    Ok(())
}

#[test]
fn library_pipeline_is_deterministic_over_sample_universe() -> Result<()> {
    ensure_test_env();
    let observations = generate_observations(&sample_config());
    let config = PipelineConfig {
        worker_threads: 3,
        ..PipelineConfig::default()
    };
    let mut store = HistoryStore::new(config.history.horizon_days);
    let summary = ingest(&mut store, &observations);
    assert!(summary.rejected.is_empty());

    let as_of = store
        .latest_date_overall()
        .ok_or_else(|| anyhow!("empty store"))?;
    let pipeline = DailyPipeline::new(config, Box::new(BlendedConfidence::strength_only()))?;
    let mut sink = MemoryReportSink::default();
    for _ in 0..2 {
        let report = pipeline.run(&store, as_of)?;
        sink.publish(&report)?;
    }

    let (first, second) = (&sink.reports[0], &sink.reports[1]);
    assert_eq!(first.signals, second.signals);
    assert_eq!(first.cluster_assignments, second.cluster_assignments);
    assert_eq!(first.clusters, second.clusters);
    assert_eq!(first.universe_size, 10);

    let aapl = first
        .pattern_matches
        .iter()
        .find(|found| found.ticker == "AAPL" && found.pattern_kind == PatternKind::Accumulation)
        .ok_or_else(|| anyhow!("AAPL accumulation not detected"))?;
    assert!((aapl.strength - 1.0).abs() < 1e-12);
    assert!(aapl.window_length >= 5);

    // Each ticker sits in at most one cluster.
    for cluster in &first.clusters {
        for member in &cluster.members {
            assert_eq!(first.cluster_assignments.get(member), Some(&cluster.cluster_id));
        }
    }
    for signal in &first.signals {
        let bullish = matches!(
            signal.pattern_kind,
            PatternKind::Accumulation | PatternKind::GammaSqueeze
        );
        assert_eq!(signal.action == SignalAction::BuyCall, bullish);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn import_json_builds_loadable_snapshot() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let json_path = dir.path().join("observations.json");
    let snapshot_path = dir.path().join("imported.bin");

    let observations = generate_observations(&SampleConfig {
        tickers: 2,
        days: 5,
        reference_ticker: None,
        ..SampleConfig::default()
    });
    fs::write(&json_path, serde_json::to_string(&observations)?)?;

    import_json::run(&json_path, &snapshot_path).await?;
    let loaded = OiSnapshot::load_from_file(&snapshot_path, &Default::default())?;
    assert_eq!(loaded.observations, observations);
    assert_eq!(loaded.dates().len(), 5);
    Ok(())
}
