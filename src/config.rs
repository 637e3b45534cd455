use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::{DEFAULT_MANUAL_DELAY_SECS, DEFAULT_STARTUP_DELAY_SECS};
use crate::error::ConfigError;
use crate::filters::FilterParams;
use crate::types::DEFAULT_CHANNEL_COUNT;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // ── Channels ──
    pub channel_count: usize,

    // ── Filter ──
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub initial_error_variance: f64,

    // ── Calibration ──
    pub startup_calibration_delay_secs: f64,
    pub manual_calibration_delay_secs: f64,

    // ── Framing ──
    /// Discard the line buffer past this many newline-free bytes. `None` keeps
    /// the unbounded behavior.
    pub max_buffer_bytes: Option<usize>,

    // ── Driver ──
    pub tick_interval_ms: u64,
    pub silence_threshold_secs: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let filter = FilterParams::default();
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            process_noise: filter.process_noise,
            measurement_noise: filter.measurement_noise,
            initial_error_variance: filter.initial_error_variance,
            startup_calibration_delay_secs: DEFAULT_STARTUP_DELAY_SECS,
            manual_calibration_delay_secs: DEFAULT_MANUAL_DELAY_SECS,
            max_buffer_bytes: None,
            tick_interval_ms: 16,
            silence_threshold_secs: 2.0,
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file; missing keys fall back to defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn filter_params(&self) -> FilterParams {
        FilterParams {
            process_noise: self.process_noise,
            measurement_noise: self.measurement_noise,
            initial_error_variance: self.initial_error_variance,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_count == 0 {
            return Err(ConfigError::NoChannels);
        }
        for (name, value, allow_zero) in [
            ("process_noise", self.process_noise, true),
            ("measurement_noise", self.measurement_noise, false),
            ("initial_error_variance", self.initial_error_variance, true),
        ] {
            let in_range = if allow_zero { value >= 0.0 } else { value > 0.0 };
            if !in_range || !value.is_finite() {
                return Err(ConfigError::InvalidParameters(format!(
                    "{} must be finite and {}, got {}",
                    name,
                    if allow_zero { "non-negative" } else { "positive" },
                    value
                )));
            }
        }
        for (name, value) in [
            ("startup_calibration_delay_secs", self.startup_calibration_delay_secs),
            ("manual_calibration_delay_secs", self.manual_calibration_delay_secs),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ConfigError::InvalidParameters(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.max_buffer_bytes == Some(0) {
            return Err(ConfigError::InvalidParameters(
                "max_buffer_bytes must be greater than zero".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidParameters(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = TrackerConfig::default();
        assert_eq!(config.channel_count, 3);
        assert_eq!(config.process_noise, 0.01);
        assert_eq!(config.measurement_noise, 0.1);
        assert_eq!(config.initial_error_variance, 1.0);
        assert_eq!(config.startup_calibration_delay_secs, 5.0);
        assert_eq!(config.manual_calibration_delay_secs, 0.0);
        assert_eq!(config.max_buffer_bytes, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TrackerConfig::default();
        config.channel_count = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoChannels));

        let mut config = TrackerConfig::default();
        config.measurement_noise = 0.0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.process_noise = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.startup_calibration_delay_secs = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_infinite_filter_params() {
        for field in 0..3 {
            let mut config = TrackerConfig::default();
            match field {
                0 => config.process_noise = f64::INFINITY,
                1 => config.measurement_noise = f64::INFINITY,
                _ => config.initial_error_variance = f64::INFINITY,
            }
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidParameters(_))),
                "field {} accepted +inf",
                field
            );
        }
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channel_count": 2, "max_buffer_bytes": 4096 }}"#).unwrap();

        let config = TrackerConfig::load(file.path()).unwrap();
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.max_buffer_bytes, Some(4096));
        assert_eq!(config.measurement_noise, 0.1);
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channel_count": 0 }}"#).unwrap();
        assert!(TrackerConfig::load(file.path()).is_err());
    }
}
