use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Exporter health as served on the health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterHealth {
    /// Exporter uptime in seconds
    pub uptime_secs: u64,
    /// Scrapes served on the telemetry path
    pub scrapes: u64,
    /// Scrapes whose nvidia-smi output could not be parsed as CSV
    pub failed_scrapes: u64,
    /// nvidia-smi invocations that failed, timed out or exited non-zero
    pub smi_errors: u64,
    /// Last error message (if any)
    pub last_error: Option<String>,
    pub last_scrape_at: Option<DateTime<Utc>>,
    /// Devices seen in the last scrape
    pub last_scrape_devices: usize,
    /// Values counted by diagnostic metrics in the last scrape
    pub last_scrape_anomalies: usize,
}

/// Health tracker shared by request threads
pub struct HealthTracker {
    start_time: Instant,
    scrapes: u64,
    failed_scrapes: u64,
    smi_errors: u64,
    last_error: Option<String>,
    last_scrape_at: Option<DateTime<Utc>>,
    last_scrape_devices: usize,
    last_scrape_anomalies: usize,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            scrapes: 0,
            failed_scrapes: 0,
            smi_errors: 0,
            last_error: None,
            last_scrape_at: None,
            last_scrape_devices: 0,
            last_scrape_anomalies: 0,
        }
    }

    pub fn record_scrape(&mut self, devices: usize, anomalies: usize) {
        self.scrapes += 1;
        self.last_scrape_at = Some(Utc::now());
        self.last_scrape_devices = devices;
        self.last_scrape_anomalies = anomalies;
    }

    pub fn record_failed_scrape(&mut self, error: String) {
        self.scrapes += 1;
        self.failed_scrapes += 1;
        self.last_scrape_at = Some(Utc::now());
        self.last_scrape_devices = 0;
        self.last_scrape_anomalies = 0;
        self.last_error = Some(error);
    }

    pub fn record_smi_error(&mut self, error: String) {
        self.smi_errors += 1;
        self.last_error = Some(error);
    }

    pub fn get_health(&self) -> ExporterHealth {
        ExporterHealth {
            uptime_secs: self.start_time.elapsed().as_secs(),
            scrapes: self.scrapes,
            failed_scrapes: self.failed_scrapes,
            smi_errors: self.smi_errors,
            last_error: self.last_error.clone(),
            last_scrape_at: self.last_scrape_at,
            last_scrape_devices: self.last_scrape_devices,
            last_scrape_anomalies: self.last_scrape_anomalies,
        }
    }
}
