pub mod clustering;
pub mod commands;
pub mod confidence;
pub mod config;
pub mod delta;
pub mod error;
pub mod features;
pub mod history;
pub mod market_context;
pub mod models;
pub mod pattern;
pub mod pipeline;
pub mod report;
pub mod run_status;
pub mod sample;
pub mod signals;
pub mod snapshot;
