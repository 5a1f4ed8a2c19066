//! Exports nvidia-smi GPU telemetry in the Prometheus text format.

pub mod cli;
pub mod config;
pub mod exposition;
pub mod health;
pub mod metrics_auth;
pub mod names;
pub mod pstate;
pub mod scrape;
pub mod server;
pub mod smi;
pub mod translate;
pub mod value;
