use crate::config::FieldPlan;
use crate::exposition::MetricWriter;
use crate::smi::{SmiError, TelemetrySource};
use crate::translate::{translate_row, DeviceRow};
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("error reading CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// What a scrape produced, for logging and health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub devices: usize,
    pub anomalies: usize,
    pub lines_written: usize,
    pub write_failures: usize,
    /// Set when nvidia-smi itself failed; the scrape still used whatever it printed.
    pub smi_error: Option<String>,
}

/// Drops spaces and tabs at the start of every field outside quotes.
///
/// nvidia-smi separates fields with `", "`, and the reader only treats a
/// quote as opening a quoted field when it is the first byte of the field.
pub fn trim_leading_space(csv_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(csv_bytes.len());
    let mut at_field_start = true;
    let mut in_quotes = false;
    let mut bytes = csv_bytes.iter().copied().peekable();

    while let Some(b) = bytes.next() {
        if in_quotes {
            out.push(b);
            if b == b'"' {
                if bytes.peek() == Some(&b'"') {
                    out.push(b'"');
                    bytes.next();
                } else {
                    in_quotes = false;
                }
            }
            continue;
        }
        if at_field_start && (b == b' ' || b == b'\t') {
            continue;
        }
        if at_field_start && b == b'"' {
            in_quotes = true;
            at_field_start = false;
            out.push(b);
            continue;
        }
        at_field_start = matches!(b, b',' | b'\n' | b'\r');
        out.push(b);
    }
    out
}

/// Reads headerless nvidia-smi CSV into device rows.
///
/// Either every record parses or nothing is returned.
pub fn parse_rows(csv_bytes: &[u8]) -> Result<Vec<DeviceRow>, ScrapeError> {
    let trimmed = trim_leading_space(csv_bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(trimmed.as_slice());

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        match DeviceRow::from_record(record.iter()) {
            Some(row) => rows.push(row),
            None => log::warn!("skipping CSV record {line} without device name and index"),
        }
    }
    Ok(rows)
}

/// Translates a whole CSV buffer and writes it out row by row.
pub fn render<W: Write>(
    plan: &FieldPlan,
    csv_bytes: &[u8],
    writer: &mut MetricWriter<W>,
) -> Result<ScrapeReport, ScrapeError> {
    let rows = parse_rows(csv_bytes)?;
    let mut report = ScrapeReport {
        devices: rows.len(),
        ..Default::default()
    };
    for row in &rows {
        let output = translate_row(plan, row);
        report.anomalies += output.ledger.total();
        output.write_to(writer);
    }
    report.lines_written = writer.written();
    report.write_failures = writer.failed();
    Ok(report)
}

/// One field plan bound to one telemetry source.
pub struct Scraper {
    plan: FieldPlan,
    source: Box<dyn TelemetrySource>,
}

impl Scraper {
    pub fn new(plan: FieldPlan, source: Box<dyn TelemetrySource>) -> Self {
        Self { plan, source }
    }

    pub fn plan(&self) -> &FieldPlan {
        &self.plan
    }

    /// Queries the source and writes the exposition text to `out`.
    ///
    /// A failing source is logged and its partial output is still rendered.
    pub fn scrape<W: Write>(&self, out: W) -> Result<ScrapeReport, ScrapeError> {
        let (csv_bytes, smi_error) = match self.source.query() {
            Ok(bytes) => (bytes, None),
            Err(err) => {
                log::error!(
                    "error executing nvidia-smi: {err} (command: {})",
                    self.source.describe()
                );
                let message = err.to_string();
                let partial = match err {
                    SmiError::Failed { stdout, .. } => stdout,
                    _ => Vec::new(),
                };
                (partial, Some(message))
            }
        };

        let mut writer = MetricWriter::new(out);
        let mut report = render(&self.plan, &csv_bytes, &mut writer).inspect_err(|err| {
            log::error!("{err}");
        })?;
        report.smi_error = smi_error;
        Ok(report)
    }
}
