use serde::{Deserialize, Serialize};

/// Tracks whether the byte source is still delivering
///
/// Time is the driver's tick clock in seconds, so the monitor never reads a
/// wall clock on its own.
#[derive(Clone, Debug)]
pub struct SourceHealth {
    pub name: String,
    pub silence_threshold: f64,
    started_at: Option<f64>,
    last_data_at: Option<f64>,
    consecutive_errors: u32,
    total_errors: u64,
    warned_silent: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub silence_duration_secs: f64,
    pub consecutive_errors: u32,
    pub total_errors: u64,
}

impl SourceHealth {
    pub fn new(name: &str, silence_threshold_secs: f64) -> Self {
        SourceHealth {
            name: name.to_string(),
            silence_threshold: silence_threshold_secs,
            started_at: None,
            last_data_at: None,
            consecutive_errors: 0,
            total_errors: 0,
            warned_silent: false,
        }
    }

    /// Note a tick; the first one starts the silence clock
    pub fn observe_tick(&mut self, now: f64) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if self.is_silent(now) && !self.warned_silent {
            log::warn!(
                "[{}] no data for {:.1}s",
                self.name,
                self.silence_duration(now)
            );
            self.warned_silent = true;
        }
    }

    pub fn record_data(&mut self, now: f64) {
        if self.warned_silent {
            log::info!("[{}] data resumed", self.name);
        }
        self.last_data_at = Some(now);
        self.consecutive_errors = 0;
        self.warned_silent = false;
    }

    pub fn record_error(&mut self) {
        self.consecutive_errors += 1;
        self.total_errors += 1;
    }

    pub fn silence_duration(&self, now: f64) -> f64 {
        match self.last_data_at.or(self.started_at) {
            Some(t) => (now - t).max(0.0),
            None => 0.0,
        }
    }

    pub fn is_silent(&self, now: f64) -> bool {
        self.silence_duration(now) > self.silence_threshold
    }

    pub fn check_health(&self, now: f64) -> HealthReport {
        HealthReport {
            healthy: !self.is_silent(now) && self.consecutive_errors == 0,
            silence_duration_secs: self.silence_duration(now),
            consecutive_errors: self.consecutive_errors,
            total_errors: self.total_errors,
        }
    }

    /// Format health status for logging
    pub fn format_status(&self, now: f64) -> String {
        let report = self.check_health(now);
        if report.healthy {
            format!("{}: ✓", self.name)
        } else if report.consecutive_errors > 0 {
            format!("{}: ⚠ ({} read errors)", self.name, report.consecutive_errors)
        } else {
            format!("{}: ⚠ (silent {:.1}s)", self.name, report.silence_duration_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_detection() {
        let mut health = SourceHealth::new("serial", 1.0);
        health.observe_tick(0.0);
        assert!(!health.is_silent(0.5));

        // Never received anything: silence counts from the first tick
        assert!(health.is_silent(1.5));

        health.record_data(1.5);
        assert!(!health.is_silent(2.0));
        assert!(health.is_silent(2.6));
    }

    #[test]
    fn test_errors_reset_on_data() {
        let mut health = SourceHealth::new("serial", 10.0);
        health.observe_tick(0.0);
        health.record_error();
        health.record_error();

        let report = health.check_health(0.1);
        assert!(!report.healthy);
        assert_eq!(report.consecutive_errors, 2);
        assert!(health.format_status(0.1).contains("2 read errors"));

        health.record_data(0.2);
        let report = health.check_health(0.3);
        assert!(report.healthy);
        assert_eq!(report.total_errors, 2);
        assert!(health.format_status(0.3).contains("✓"));
    }

    #[test]
    fn test_unstarted_monitor_is_healthy() {
        let health = SourceHealth::new("serial", 1.0);
        assert!(health.check_health(100.0).healthy);
    }
}
