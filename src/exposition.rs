//! Prometheus text lines of the form `name{gpu="label"} value`.

use std::io::Write;

/// Writes samples to a sink, logging failures instead of returning them.
pub struct MetricWriter<W: Write> {
    out: W,
    written: usize,
    failed: usize,
}

impl<W: Write> MetricWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            failed: 0,
        }
    }

    pub fn write_sample(&mut self, metric: &str, device: &str, value: f64) {
        let line = format_sample(metric, device, value);
        match self.out.write_all(line.as_bytes()) {
            Ok(()) => self.written += 1,
            Err(err) => {
                self.failed += 1;
                log::error!("error writing metric {metric} for gpu {device}: {err}");
            }
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn format_sample(metric: &str, device: &str, value: f64) -> String {
    format!(
        "{metric}{{gpu=\"{}\"}} {}\n",
        escape_label_value(device),
        format_value(value)
    )
}

/// Six decimals, with the exposition spellings for non-finite values.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{value:.6}")
    }
}

pub fn escape_label_value(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn formats_six_decimals() {
        assert_eq!(
            format_sample("nvidia_temperature_gpu", "GPU-A[0]", 65.0),
            "nvidia_temperature_gpu{gpu=\"GPU-A[0]\"} 65.000000\n"
        );
        assert_eq!(format_value(0.1234567), "0.123457");
        assert_eq!(format_value(-2.5), "-2.500000");
    }

    #[test]
    fn non_finite_values_use_exposition_spelling() {
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label_value(r#"Tesla "T4"\x"#), r#"Tesla \"T4\"\\x"#);
        assert_eq!(escape_label_value("a\nb"), "a\\nb");
        assert_eq!(escape_label_value("NVIDIA GeForce RTX 3090[1]"), "NVIDIA GeForce RTX 3090[1]");
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_do_not_stop_the_writer() {
        let mut writer = MetricWriter::new(FailingSink);
        writer.write_sample("nvidia_fan_speed", "GPU[0]", 30.0);
        writer.write_sample("nvidia_power_draw", "GPU[0]", 70.0);
        assert_eq!(writer.failed(), 2);
        assert_eq!(writer.written(), 0);
    }

    #[test]
    fn appends_lines_in_order() {
        let mut writer = MetricWriter::new(Vec::new());
        writer.write_sample("nvidia_a", "G[0]", 1.0);
        writer.write_sample("nvidia_b", "G[0]", 2.0);
        assert_eq!(writer.written(), 2);
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text, "nvidia_a{gpu=\"G[0]\"} 1.000000\nnvidia_b{gpu=\"G[0]\"} 2.000000\n");
    }
}
