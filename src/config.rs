use crate::names::{self, Diagnostic};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9101";
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub const DEFAULT_EXECUTABLE: &str = "nvidia-smi";
pub const DEFAULT_PSTATE_FIELD: &str = "pstate";
pub const HEALTH_PATH: &str = "/health";
pub const DEFAULT_SMI_TIMEOUT: Duration = Duration::from_secs(10);

/// Query fields requested when none are configured.
pub const DEFAULT_FIELDS: &[&str] = &[
    "clocks.applications.gr",
    "clocks.applications.graphics",
    "clocks.applications.mem",
    "clocks.applications.memory",
    "clocks.current.graphics",
    "clocks.current.memory",
    "clocks.current.sm",
    "clocks.current.video",
    "clocks.default_applications.gr",
    "clocks.default_applications.graphics",
    "clocks.default_applications.mem",
    "clocks.default_applications.memory",
    "clocks.gr",
    "clocks.max.gr",
    "clocks.max.graphics",
    "clocks.max.mem",
    "clocks.max.memory",
    "clocks.max.sm",
    "clocks.mem",
    "clocks.sm",
    "clocks_throttle_reasons.gpu_idle",
    "clocks_throttle_reasons.hw_power_brake_slowdown",
    "clocks_throttle_reasons.hw_slowdown",
    "clocks_throttle_reasons.hw_thermal_slowdown",
    "clocks_throttle_reasons.sw_thermal_slowdown",
    "clocks_throttle_reasons.sync_boost",
    "clocks.video",
    "driver_version",
    "ecc.errors.corrected.aggregate.device_memory",
    "ecc.errors.corrected.aggregate.l1_cache",
    "ecc.errors.corrected.aggregate.l2_cache",
    "ecc.errors.corrected.aggregate.register_file",
    "ecc.errors.corrected.aggregate.texture_memory",
    "ecc.errors.corrected.aggregate.total",
    "ecc.errors.corrected.volatile.l1_cache",
    "ecc.errors.corrected.volatile.l2_cache",
    "ecc.errors.corrected.volatile.register_file",
    "ecc.errors.corrected.volatile.texture_memory",
    "ecc.errors.corrected.volatile.total",
    "ecc.errors.uncorrected.aggregate.device_memory",
    "ecc.errors.uncorrected.aggregate.l1_cache",
    "ecc.errors.uncorrected.aggregate.l2_cache",
    "ecc.errors.uncorrected.aggregate.register_file",
    "ecc.errors.uncorrected.aggregate.texture_memory",
    "ecc.errors.uncorrected.aggregate.total",
    "ecc.errors.uncorrected.volatile.device_memory",
    "ecc.errors.uncorrected.volatile.l1_cache",
    "ecc.errors.uncorrected.volatile.l2_cache",
    "ecc.errors.uncorrected.volatile.register_file",
    "ecc.errors.uncorrected.volatile.texture_memory",
    "ecc.errors.uncorrected.volatile.total",
    "encoder.stats.averageFps",
    "encoder.stats.averageLatency",
    "encoder.stats.sessionCount",
    "enforced.power.limit",
    "fan.speed",
    "memory.free",
    "memory.total",
    "memory.used",
    "power.default_limit",
    "power.draw",
    "power.limit",
    "power.management",
    "power.max_limit",
    "power.min_limit",
    "pstate",
    "retired_pages.dbe",
    "retired_pages.double_bit.count",
    "retired_pages.pending",
    "retired_pages.sbe",
    "retired_pages.single_bit_ecc.count",
    "temperature.gpu",
    "utilization.gpu",
    "utilization.memory",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("field {field:?} maps to {metric}, which is reserved for pstate field {pstate_field:?}")]
    PStateCollision {
        field: String,
        metric: String,
        pstate_field: String,
    },
    #[error("fields {first:?} and {second:?} both map to metric {metric}")]
    DuplicateMetric {
        first: String,
        second: String,
        metric: String,
    },
    #[error("field {field:?} maps to diagnostic metric {metric}")]
    DiagnosticCollision { field: String, metric: String },
    #[error("empty field identifier at position {0}")]
    EmptyField(usize),
    #[error("telemetry path {0:?} must start with '/' and must not be '/' or '/health'")]
    InvalidTelemetryPath(String),
}

/// Which decoder a column goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Value,
    PState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub field: String,
    pub metric: String,
    pub decoder: Decoder,
}

/// Query fields resolved to metric names and decoders, in CSV column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPlan {
    columns: Vec<Column>,
}

impl FieldPlan {
    /// Binds each field to its decoder once, rejecting name collisions.
    pub fn new<S: AsRef<str>>(fields: &[S], pstate_field: &str) -> Result<Self, ConfigError> {
        let pstate_field = pstate_field.trim();
        let pstate_metric = names::field_metric_name(pstate_field);
        let diagnostics: Vec<String> = Diagnostic::ALL.iter().map(|d| d.metric_name()).collect();
        let mut columns: Vec<Column> = Vec::with_capacity(fields.len());

        for (idx, field) in fields.iter().enumerate() {
            let field = field.as_ref().trim();
            if field.is_empty() {
                return Err(ConfigError::EmptyField(idx));
            }
            let metric = names::field_metric_name(field);
            if diagnostics.contains(&metric) {
                return Err(ConfigError::DiagnosticCollision {
                    field: field.to_string(),
                    metric,
                });
            }
            if let Some(prev) = columns.iter().find(|c| c.metric == metric) {
                return Err(ConfigError::DuplicateMetric {
                    first: prev.field.clone(),
                    second: field.to_string(),
                    metric,
                });
            }
            let decoder = if field == pstate_field {
                Decoder::PState
            } else if metric == pstate_metric {
                return Err(ConfigError::PStateCollision {
                    field: field.to_string(),
                    metric,
                    pstate_field: pstate_field.to_string(),
                });
            } else {
                Decoder::Value
            };
            columns.push(Column {
                field: field.to_string(),
                metric,
                decoder,
            });
        }

        Ok(FieldPlan { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.field.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Everything the exporter needs, gathered from flags and environment.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub listen_address: String,
    pub telemetry_path: String,
    pub executable: String,
    pub fields: Vec<String>,
    pub pstate_field: String,
    pub smi_timeout: Duration,
    /// Bearer token guarding the telemetry and health endpoints.
    pub metrics_token: Option<String>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
            executable: DEFAULT_EXECUTABLE.to_string(),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            pstate_field: DEFAULT_PSTATE_FIELD.to_string(),
            smi_timeout: DEFAULT_SMI_TIMEOUT,
            metrics_token: None,
        }
    }
}

impl ExporterConfig {
    /// Fills the values that only come from the environment.
    pub fn with_env(mut self) -> Self {
        if let Ok(exe) = std::env::var("NVIDIA_SMI") {
            if !exe.is_empty() {
                self.executable = exe;
            }
        }
        self.metrics_token = std::env::var("NVIDIA_SMI_EXPORTER_METRICS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        self
    }

    pub fn field_plan(&self) -> Result<FieldPlan, ConfigError> {
        FieldPlan::new(&self.fields, &self.pstate_field)
    }

    /// Checks the serving surface and resolves the field plan.
    pub fn validate(&self) -> Result<FieldPlan, ConfigError> {
        let path = self.telemetry_path.as_str();
        if !path.starts_with('/') || path == "/" || path == HEALTH_PATH {
            return Err(ConfigError::InvalidTelemetryPath(path.to_string()));
        }
        self.field_plan()
    }
}

/// Splits a comma separated field list, dropping blanks.
pub fn parse_field_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fields_form_a_valid_plan() {
        let plan = ExporterConfig::default().field_plan().unwrap();
        assert_eq!(plan.len(), DEFAULT_FIELDS.len());
        let pstates: Vec<&Column> = plan
            .columns()
            .iter()
            .filter(|c| c.decoder == Decoder::PState)
            .collect();
        assert_eq!(pstates.len(), 1);
        assert_eq!(pstates[0].metric, "nvidia_pstate");
    }

    #[test]
    fn plan_keeps_field_order() {
        let plan = FieldPlan::new(&["temperature.gpu", "pstate", "fan.speed"], "pstate").unwrap();
        let metrics: Vec<&str> = plan.columns().iter().map(|c| c.metric.as_str()).collect();
        assert_eq!(
            metrics,
            vec!["nvidia_temperature_gpu", "nvidia_pstate", "nvidia_fan_speed"]
        );
        assert_eq!(plan.columns()[1].decoder, Decoder::PState);
        assert_eq!(plan.columns()[2].decoder, Decoder::Value);
    }

    #[test]
    fn padded_pstate_field_keeps_its_decoder() {
        let plan = FieldPlan::new(&[" pstate "], " pstate").unwrap();
        assert_eq!(plan.columns()[0].field, "pstate");
        assert_eq!(plan.columns()[0].decoder, Decoder::PState);
    }

    #[test]
    fn lookalike_of_pstate_field_is_rejected() {
        let err = FieldPlan::new(&["p.state", "p_state"], "p.state").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMetric { .. }));

        let plan = FieldPlan::new(&["pstate"], "performance.state").unwrap();
        assert_eq!(plan.columns()[0].decoder, Decoder::Value);

        let err = FieldPlan::new(&["p_state"], "p.state").unwrap_err();
        assert!(matches!(err, ConfigError::PStateCollision { .. }));
    }

    #[test]
    fn duplicate_metric_names_are_rejected() {
        let err = FieldPlan::new(&["memory.used", "memory_used"], "pstate").unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateMetric {
                first: "memory.used".into(),
                second: "memory_used".into(),
                metric: "nvidia_memory_used".into(),
            }
        );
    }

    #[test]
    fn diagnostic_names_are_reserved() {
        let err = FieldPlan::new(&["unknown.error"], "pstate").unwrap_err();
        assert!(matches!(err, ConfigError::DiagnosticCollision { .. }));
    }

    #[test]
    fn empty_field_is_rejected() {
        let err = FieldPlan::new(&["fan.speed", " "], "pstate").unwrap_err();
        assert_eq!(err, ConfigError::EmptyField(1));
    }

    #[test]
    fn telemetry_path_must_not_shadow_other_routes() {
        let mut cfg = ExporterConfig::default();
        assert!(cfg.validate().is_ok());
        for bad in ["/", "/health", "metrics"] {
            cfg.telemetry_path = bad.to_string();
            assert!(matches!(
                cfg.validate(),
                Err(ConfigError::InvalidTelemetryPath(_))
            ));
        }
    }

    #[test]
    fn field_list_parsing_trims() {
        assert_eq!(
            parse_field_list(" fan.speed, ,pstate,"),
            vec!["fan.speed".to_string(), "pstate".to_string()]
        );
    }
}
