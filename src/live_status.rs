use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::calibration::CalibrationState;
use crate::health_monitor::HealthReport;
use crate::pipeline::{ChannelSnapshot, OrientationPipeline, PipelineStats};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub source: String,
    // Pipeline counters
    pub stats: PipelineStats,
    pub buffered_bytes: usize,
    // Calibration
    pub calibration_complete: bool,
    pub calibration_state: CalibrationState,
    pub calibration_count: u64,
    // Per-channel view
    pub channels: Vec<ChannelSnapshot>,
    // Health monitoring
    pub source_healthy: bool,
    pub source_silence_duration_secs: f64,
    pub source_errors: u64,
}

impl LiveStatus {
    pub fn new(source: &str) -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            source: source.to_string(),
            stats: PipelineStats::default(),
            buffered_bytes: 0,
            calibration_complete: false,
            calibration_state: CalibrationState::Idle,
            calibration_count: 0,
            channels: Vec::new(),
            source_healthy: true,
            source_silence_duration_secs: 0.0,
            source_errors: 0,
        }
    }

    /// Refresh everything from the pipeline and the source health report
    pub fn update(&mut self, pipeline: &OrientationPipeline, health: &HealthReport, uptime_secs: f64) {
        self.timestamp = current_timestamp();
        self.uptime_seconds = uptime_secs.max(0.0) as u64;
        self.stats = pipeline.stats().clone();
        self.buffered_bytes = pipeline.buffered_bytes();
        self.calibration_complete = pipeline.is_calibrated();
        self.calibration_state = pipeline.calibration().state();
        self.calibration_count = pipeline.calibration().completions();
        self.channels = pipeline.channel_snapshots();
        self.source_healthy = health.healthy;
        self.source_silence_duration_secs = health.silence_duration_secs;
        self.source_errors = health.total_errors;
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
