use anyhow::Result;
use rerun::{archetypes::Scalar, RecordingStreamBuilder};

use crate::calibration::CalibrationEvent;
use crate::pipeline::{ChannelSnapshot, TickOutput};
use crate::sink::OrientationSink;
use crate::types::Orientation;

/// Rerun time-series recorder for raw, filtered and corrected components
/// Supports Rerun v0.15+ API with archetype-based logging
pub struct RerunLogger {
    rec: rerun::RecordingStream,
    time: Option<f64>,
}

impl RerunLogger {
    /// Initialize Rerun recording to file
    /// Takes output path (e.g., "orientation_sessions/rerun_20261017_120000.rrd")
    pub fn new(output_path: &str) -> Result<Self> {
        let rec = RecordingStreamBuilder::new("orientation_tracker")
            .save(output_path)
            .map_err(|e| anyhow::anyhow!("Failed to create Rerun recording: {}", e))?;

        log::info!("Rerun recording initialized to: {}", output_path);

        Ok(RerunLogger { rec, time: None })
    }

    /// Set the current time for all subsequent logs
    pub fn set_time(&mut self, elapsed_secs: f64) {
        self.rec.set_time_seconds("stable_time", elapsed_secs);
        self.time = Some(elapsed_secs);
    }

    /// Time stamped on everything logged since the last `set_time`
    pub fn current_time(&self) -> Option<f64> {
        self.time
    }

    /// Log one full tick: pipeline stages first, then offsets and corrected output,
    /// all stamped with the tick's time
    pub fn log_tick(&mut self, output: &TickOutput, snapshots: &[ChannelSnapshot]) -> Result<()> {
        self.set_time(output.now);
        self.log_channels(snapshots);
        self.apply(output)
    }

    pub fn log_scalar(&self, path: &str, value: f64) {
        let _ = self.rec.log(path, &Scalar::new(value));
    }

    fn log_orientation(&self, prefix: &str, o: &Orientation) {
        self.log_scalar(&format!("{}/x", prefix), o.x);
        self.log_scalar(&format!("{}/y", prefix), o.y);
        self.log_scalar(&format!("{}/z", prefix), o.z);
        self.log_scalar(&format!("{}/w", prefix), o.w);
    }

    /// Log the pre-correction stages of every channel
    pub fn log_channels(&self, snapshots: &[ChannelSnapshot]) {
        for s in snapshots {
            if let Some(raw) = s.latest_raw.as_ref() {
                self.log_orientation(&format!("channel/{}/raw", s.channel), raw);
            }
            if let Some(filtered) = s.filtered.as_ref() {
                self.log_orientation(&format!("channel/{}/filtered", s.channel), filtered);
                // Filter drift off the unit sphere
                self.log_scalar(&format!("channel/{}/filtered_norm", s.channel), filtered.norm());
            }
            self.log_scalar(
                &format!("channel/{}/error_variance", s.channel),
                s.error_variance[0],
            );
        }
    }
}

impl OrientationSink for RerunLogger {
    fn apply(&mut self, output: &TickOutput) -> Result<()> {
        self.set_time(output.now);
        for event in &output.calibration {
            if let CalibrationEvent::Completed { offsets, .. } = event {
                for (channel, offset) in offsets.iter().enumerate() {
                    self.log_orientation(&format!("channel/{}/offset", channel), offset);
                }
            }
        }
        for o in &output.orientations {
            self.log_orientation(&format!("channel/{}/corrected", o.channel), &o.orientation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::pipeline::OrientationPipeline;

    #[test]
    fn test_log_tick_stamps_current_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.rrd");
        let mut logger = RerunLogger::new(path.to_str().unwrap()).unwrap();
        assert_eq!(logger.current_time(), None);

        let mut pipeline = OrientationPipeline::new(TrackerConfig::default());
        pipeline.on_bytes(b"0,1,0,0,0\n");
        pipeline.on_calibrate_request(0.0);

        for now in [0.0, 0.016, 0.032] {
            let output = pipeline.on_tick(now);
            logger
                .log_tick(&output, &pipeline.channel_snapshots())
                .unwrap();
            assert_eq!(logger.current_time(), Some(now));
        }
    }
}
