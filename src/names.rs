//! Metric naming for nvidia-smi query fields.

/// Prefix shared by every metric the exporter produces.
pub const NAMESPACE: &str = "nvidia_";

/// Synthesized per-device counters describing values that could not be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Diagnostic {
    UnparseableValue,
    FieldUnsupported,
    UnknownError,
    PStateUnparseable,
}

impl Diagnostic {
    /// Emission order within a device's block of output.
    pub const ALL: [Diagnostic; 4] = [
        Diagnostic::UnparseableValue,
        Diagnostic::FieldUnsupported,
        Diagnostic::UnknownError,
        Diagnostic::PStateUnparseable,
    ];

    pub fn metric_name(self) -> String {
        metric_name(self.suffix())
    }

    fn suffix(self) -> &'static str {
        match self {
            Diagnostic::UnparseableValue => "unparseable_query_result_value",
            Diagnostic::FieldUnsupported => "query_field_unsupported",
            Diagnostic::UnknownError => "unknown_error",
            Diagnostic::PStateUnparseable => "pstate_unparseable",
        }
    }
}

pub fn metric_name(suffix: &str) -> String {
    format!("{NAMESPACE}{suffix}")
}

/// `memory.total` becomes `nvidia_memory_total`.
pub fn field_metric_name(field: &str) -> String {
    metric_name(&field.replace('.', "_"))
}

/// Metric names for the given fields, in the same order.
pub fn derive_names<S: AsRef<str>>(fields: &[S]) -> Vec<String> {
    fields
        .iter()
        .map(|f| field_metric_name(f.as_ref()))
        .collect()
}

/// Every metric name the fields can produce, diagnostics included, sorted and deduplicated.
pub fn all_metric_names<S: AsRef<str>>(fields: &[S]) -> Vec<String> {
    let mut names = derive_names(fields);
    names.extend(Diagnostic::ALL.iter().map(|d| d.metric_name()));
    names.sort();
    names.dedup();
    names
}
