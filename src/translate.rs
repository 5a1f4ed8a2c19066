use crate::config::{Decoder, FieldPlan};
use crate::exposition::MetricWriter;
use crate::names::Diagnostic;
use crate::pstate::decode_pstate;
use crate::value::{classify, Classification};
use std::collections::BTreeMap;
use std::io::Write;

/// One CSV record: device name, device index and the raw query values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub name: String,
    pub index: String,
    pub values: Vec<String>,
}

impl DeviceRow {
    /// Splits a record into device identity and values; `None` when it is too short.
    pub fn from_record<I, S>(record: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fields = record
            .into_iter()
            .map(|f| f.as_ref().trim_start().to_string());
        let name = fields.next()?;
        let index = fields.next()?;
        Some(DeviceRow {
            name,
            index,
            values: fields.collect(),
        })
    }

    pub fn label(&self) -> String {
        format!("{}[{}]", self.name, self.index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: String,
    pub value: f64,
}

/// Metric names that could not be exported for one device, by diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemLedger {
    entries: BTreeMap<Diagnostic, Vec<String>>,
}

impl Default for ProblemLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ProblemLedger {
    /// Every diagnostic starts present with no entries.
    pub fn new() -> Self {
        Self {
            entries: Diagnostic::ALL.iter().map(|d| (*d, Vec::new())).collect(),
        }
    }

    pub fn record(&mut self, diagnostic: Diagnostic, metric: &str) {
        self.entries
            .entry(diagnostic)
            .or_default()
            .push(metric.to_string());
    }

    pub fn metrics(&self, diagnostic: Diagnostic) -> &[String] {
        self.entries
            .get(&diagnostic)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn count(&self, diagnostic: Diagnostic) -> usize {
        self.metrics(diagnostic).len()
    }

    pub fn total(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Diagnostics in emission order with their metric names.
    pub fn iter(&self) -> impl Iterator<Item = (Diagnostic, &[String])> {
        self.entries.iter().map(|(d, m)| (*d, m.as_slice()))
    }
}

/// Everything one device row contributes to a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutput {
    pub device: String,
    pub samples: Vec<Sample>,
    pub ledger: ProblemLedger,
}

impl RowOutput {
    /// Ordinary samples in field order, then one counter per diagnostic.
    pub fn write_to<W: Write>(&self, writer: &mut MetricWriter<W>) {
        for sample in &self.samples {
            writer.write_sample(&sample.metric, &self.device, sample.value);
        }
        for (diagnostic, metrics) in self.ledger.iter() {
            writer.write_sample(&diagnostic.metric_name(), &self.device, metrics.len() as f64);
            if !metrics.is_empty() {
                log::debug!(
                    "non-standard metric values: metric={} gpu={} values={:?}",
                    diagnostic.metric_name(),
                    self.device,
                    metrics
                );
            }
        }
    }
}

/// Decodes every column of a device row according to the field plan.
pub fn translate_row(plan: &FieldPlan, row: &DeviceRow) -> RowOutput {
    let device = row.label();
    let mut samples = Vec::with_capacity(plan.len());
    let mut ledger = ProblemLedger::new();

    if row.values.len() > plan.len() {
        log::warn!(
            "gpu {device} reported {} values for {} query fields; ignoring the extra values",
            row.values.len(),
            plan.len()
        );
    }

    for (idx, (column, raw)) in plan.columns().iter().zip(&row.values).enumerate() {
        match column.decoder {
            Decoder::PState => match decode_pstate(raw) {
                Ok(value) => samples.push(Sample {
                    metric: column.metric.clone(),
                    value,
                }),
                Err(err) => {
                    log::warn!(
                        "error parsing pstate level: {err} (index={idx} value={raw:?} field={})",
                        column.field
                    );
                    ledger.record(Diagnostic::PStateUnparseable, &column.metric);
                }
            },
            Decoder::Value => match classify(raw) {
                Ok(reading) => match reading.classification() {
                    Classification::Ordinary => samples.push(Sample {
                        metric: column.metric.clone(),
                        value: reading.value(),
                    }),
                    Classification::Unsupported => {
                        ledger.record(Diagnostic::FieldUnsupported, &column.metric)
                    }
                    Classification::UnknownError => {
                        ledger.record(Diagnostic::UnknownError, &column.metric)
                    }
                },
                Err(err) => {
                    log::warn!(
                        "error parsing value for metric {}: {err} (index={idx} field={})",
                        column.metric,
                        column.field
                    );
                    ledger.record(Diagnostic::UnparseableValue, &column.metric);
                }
            },
        }
    }

    RowOutput {
        device,
        samples,
        ledger,
    }
}
