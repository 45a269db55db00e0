use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use oi_engine::commands::{generate_sample, import_json, inspect, run};
use std::path::PathBuf;

const DEFAULT_OI_DATA_FILE: &str = "../data/oi-snapshot.bin";

#[derive(Parser)]
#[command(name = "oi-engine")]
#[command(about = "Options open-interest pattern, clustering and signal pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily pipeline over an OI snapshot
    Run {
        /// Path to the OI snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Trading day to analyze (defaults to the latest day in the snapshot)
        #[arg(long = "as-of", value_name = "YYYY-MM-DD")]
        as_of: Option<NaiveDate>,
        /// Write the full run report as JSON
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Print a ticker's recent aggregates, deltas and pattern matches
    Inspect {
        /// Ticker symbol
        ticker: String,
        /// Path to the OI snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Days of history to show (defaults to LOOKBACK_DAYS)
        #[arg(long)]
        days: Option<usize>,
    },
    /// Convert a JSON array of observations into an OI snapshot
    ImportJson {
        #[arg(long, value_name = "PATH")]
        input: PathBuf,
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Write a seeded synthetic OI snapshot
    GenerateSample {
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Number of tradable tickers
        #[arg(long, default_value_t = 20)]
        tickers: usize,
        /// Number of trading days
        #[arg(long, default_value_t = 40)]
        days: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting oi-engine. Not financial advice.");

    match cli.command {
        Commands::Run {
            data_file,
            as_of,
            output,
        } => {
            let data_path = resolve_data_path(data_file);
            run::run(&data_path, as_of, output.as_deref()).await?;
        }
        Commands::Inspect {
            ticker,
            data_file,
            days,
        } => {
            let data_path = resolve_data_path(data_file);
            inspect::run(&data_path, &ticker, days).await?;
        }
        Commands::ImportJson { input, output } => {
            let output_path = resolve_data_path(output);
            import_json::run(&input, &output_path).await?;
        }
        Commands::GenerateSample {
            output,
            tickers,
            days,
            seed,
        } => {
            let output_path = resolve_data_path(output);
            generate_sample::run(&output_path, tickers, days, seed).await?;
        }
    }

    Ok(())
}

fn resolve_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value.unwrap_or_else(|| PathBuf::from(DEFAULT_OI_DATA_FILE))
}
