use crate::config::{
    self, ExporterConfig, DEFAULT_LISTEN_ADDRESS, DEFAULT_PSTATE_FIELD, DEFAULT_TELEMETRY_PATH,
};
use crate::names;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::time::Duration;

/// Prometheus exporter for nvidia-smi GPU telemetry
#[derive(Debug, Parser)]
#[command(name = "nvsmi-exporter", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level, overridden by RUST_LOG
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve GPU metrics over HTTP
    Serve(ServeArgs),
    /// List the metric names that would be produced
    ListMetricNames(ListArgs),
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Comma separated nvidia-smi query fields (defaults to the built-in list)
    #[arg(long, env = "NVIDIA_SMI_FIELDS", value_name = "FIELDS")]
    pub fields: Option<String>,

    /// Query field holding the performance state (P0..P15)
    #[arg(long, env = "NVIDIA_SMI_PSTATE_FIELD", default_value = DEFAULT_PSTATE_FIELD)]
    pub pstate_field: String,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Address to listen on
    #[arg(long = "web.listen-address", env = "NVIDIA_SMI_EXPORTER_LISTEN", default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen_address: String,

    /// Path under which to expose metrics
    #[arg(long = "web.telemetry-path", env = "NVIDIA_SMI_EXPORTER_PATH", default_value = DEFAULT_TELEMETRY_PATH)]
    pub telemetry_path: String,

    /// Seconds to wait for nvidia-smi before killing it
    #[arg(long, env = "NVIDIA_SMI_TIMEOUT", default_value_t = 10)]
    pub smi_timeout: u64,
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Print one name per line instead of a single tab separated line
    #[arg(long, conflicts_with = "json")]
    pub one_per_line: bool,

    /// Print the names as a JSON array
    #[arg(long)]
    pub json: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl QueryArgs {
    fn apply(&self, mut cfg: ExporterConfig) -> ExporterConfig {
        if let Some(raw) = &self.fields {
            cfg.fields = config::parse_field_list(raw);
        }
        cfg.pstate_field = self.pstate_field.trim().to_string();
        cfg
    }
}

impl ServeArgs {
    pub fn to_config(&self) -> ExporterConfig {
        let mut cfg = self.query.apply(ExporterConfig::default().with_env());
        cfg.listen_address = self.listen_address.clone();
        cfg.telemetry_path = self.telemetry_path.clone();
        cfg.smi_timeout = Duration::from_secs(self.smi_timeout);
        cfg
    }
}

impl ListArgs {
    pub fn to_config(&self) -> ExporterConfig {
        self.query.apply(ExporterConfig::default())
    }

    /// Writes every metric name the configured fields can produce.
    pub fn write_names<W: Write>(&self, out: &mut W) -> Result<()> {
        let cfg = self.to_config();
        let plan = cfg.field_plan().context("invalid field configuration")?;
        let fields: Vec<&str> = plan.fields().collect();
        let metric_names = names::all_metric_names(&fields);
        if self.json {
            serde_json::to_writer(&mut *out, &metric_names)?;
            writeln!(out)?;
        } else if self.one_per_line {
            for name in &metric_names {
                writeln!(out, "{name}")?;
            }
        } else {
            writeln!(out, "{}", metric_names.join("\t"))?;
        }
        Ok(())
    }
}

/// Initialize logger based on log level
pub fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);
    env_logger::Builder::from_env(env)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .init();
}
