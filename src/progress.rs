// SPDX-License-Identifier: MIT
//! Throttled progress reporting for long transfers

use std::time::{Duration, Instant};
use tracing::info;

/// Minimum time between two progress lines
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Progress of one named operation
///
/// Updates are cheap; a log line is emitted at most once per report
/// interval, plus a summary from [`finish`](Progress::finish).
#[derive(Debug)]
pub struct Progress {
    operation: String,
    total: Option<u64>,
    current: u64,
    started: Instant,
    last_report: Instant,
    interval: Duration,
}

impl Progress {
    pub fn new(operation: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            operation: operation.into(),
            total: None,
            current: 0,
            started: now,
            last_report: now,
            interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the expected number of items; zero means unknown
    pub fn set_total(&mut self, total: u64) {
        self.total = (total > 0).then_some(total);
    }

    pub fn add(&mut self, n: u64) {
        self.current = self.current.saturating_add(n);
        self.maybe_report();
    }

    pub fn set_current(&mut self, current: u64) {
        self.current = current;
        self.maybe_report();
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Completion in percent, capped at 100
    pub fn percent(&self) -> Option<f64> {
        let total = self.total?;
        Some((self.current as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Estimated time remaining, extrapolated from the rate so far
    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        if self.current == 0 {
            return None;
        }
        let elapsed = self.elapsed().as_secs_f64();
        let estimated = elapsed * total as f64 / self.current as f64;
        Some(Duration::from_secs_f64((estimated - elapsed).max(0.0)))
    }

    /// Log the final summary
    pub fn finish(&self) {
        let elapsed = self.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            self.current as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let rate = format!("{:.0}/s", rate);
        info!(
            operation = %self.operation,
            items = self.current,
            elapsed = %format_duration(elapsed),
            rate = %rate,
            "{} finished",
            self.operation
        );
    }

    fn maybe_report(&mut self) {
        if self.last_report.elapsed() < self.interval {
            return;
        }
        self.last_report = Instant::now();
        self.report();
    }

    fn report(&self) {
        match (self.total, self.percent()) {
            (Some(total), Some(percent)) => {
                let eta = self
                    .eta()
                    .map(format_duration)
                    .unwrap_or_else(|| "--".to_string());
                info!(
                    operation = %self.operation,
                    current = self.current,
                    total,
                    percent = %format!("{:.2}", percent),
                    eta = %eta,
                    "progress"
                );
            }
            _ => {
                info!(operation = %self.operation, current = self.current, "progress");
            }
        }
    }
}

/// Human readable byte size, e.g. `1.50 MB`
pub fn format_byte_size(bytes: i64) -> String {
    const UNIT: f64 = 1024.0;
    const SUFFIXES: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes.unsigned_abs() < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / UNIT;
    let mut suffix = SUFFIXES[0];
    for &next in &SUFFIXES[1..] {
        if value.abs() < UNIT {
            break;
        }
        value /= UNIT;
        suffix = next;
    }
    format!("{:.2} {}", value, suffix)
}

/// Compact duration, e.g. `42s`, `3m 5s`, `2h 10m`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_byte_size() {
        assert_eq!(format_byte_size(0), "0 B");
        assert_eq!(format_byte_size(1023), "1023 B");
        assert_eq!(format_byte_size(1024), "1.00 KB");
        assert_eq!(format_byte_size(1536), "1.50 KB");
        assert_eq!(format_byte_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_byte_size(3 * 1024_i64.pow(3)), "3.00 GB");
        assert_eq!(format_byte_size(2048 * 1024_i64.pow(4)), "2048.00 TB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m 5s");
        assert_eq!(format_duration(Duration::from_secs(2 * 3600 + 10 * 60 + 7)), "2h 10m");
    }

    #[test]
    fn test_percent_and_eta() {
        let mut progress = Progress::new("Exporting").with_interval(Duration::from_secs(3600));
        assert_eq!(progress.percent(), None);
        assert_eq!(progress.eta(), None);

        progress.set_total(200);
        assert_eq!(progress.eta(), None);
        progress.add(50);
        assert_eq!(progress.percent(), Some(25.0));
        assert!(progress.eta().is_some());

        progress.set_current(400);
        assert_eq!(progress.percent(), Some(100.0));
    }

    #[test]
    fn test_zero_total_means_unknown() {
        let mut progress = Progress::new("Importing");
        progress.set_total(0);
        progress.add(10);
        assert_eq!(progress.total(), None);
        assert_eq!(progress.current(), 10);
        progress.finish();
    }
}
