// pipeline.rs: decode, filter and correct, one tick at a time
//
// Nothing here touches a transport, a clock or an output device. Bytes and
// timestamps come in, corrected orientations and events go out, so replay and
// live runs share the exact same path.

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationController, CalibrationEvent};
use crate::config::TrackerConfig;
use crate::decoder::decode;
use crate::error::{FramingError, RecordError};
use crate::filters::ChannelFilter;
use crate::framing::LineFramer;
use crate::remap::remap;
use crate::types::{correct, CorrectedOrientation, Orientation, COMPONENT_COUNT};

// ─── Per-channel state ───────────────────────────────────────────────────────

/// Everything one sensor channel owns. Slots never read each other.
#[derive(Clone, Debug)]
pub struct ChannelSlot {
    filter: ChannelFilter,
    latest_raw: Option<Orientation>,
    filtered: Option<Orientation>,
    last_corrected: Option<Orientation>,
    records: u64,
}

impl ChannelSlot {
    fn new(config: &TrackerConfig) -> Self {
        Self {
            filter: ChannelFilter::new(config.filter_params()),
            latest_raw: None,
            filtered: None,
            last_corrected: None,
            records: 0,
        }
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    /// Most recent remapped, unfiltered sample
    pub fn latest_raw(&self) -> Option<Orientation> {
        self.latest_raw
    }

    pub fn filtered(&self) -> Option<Orientation> {
        self.filtered
    }

    pub fn last_corrected(&self) -> Option<Orientation> {
        self.last_corrected
    }

    pub fn records(&self) -> u64 {
        self.records
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: usize,
    pub records: u64,
    pub latest_raw: Option<Orientation>,
    pub filtered: Option<Orientation>,
    pub corrected: Option<Orientation>,
    pub offset: Option<Orientation>,
    pub error_variance: [f64; COMPONENT_COUNT],
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub bytes: u64,
    pub lines: u64,
    pub blank_lines: u64,
    pub records_accepted: u64,
    pub malformed: u64,
    pub out_of_range: u64,
    pub buffer_overflows: u64,
    pub transport_errors: u64,
    pub ticks: u64,
    pub emissions: u64,
    pub degenerate_corrections: u64,
}

/// Outcome of one `on_bytes` call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestReport {
    pub lines: usize,
    pub accepted: usize,
    pub rejected: Vec<RecordError>,
    pub overflow: Option<FramingError>,
}

/// Outcome of one `on_tick` call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickOutput {
    pub now: f64,
    pub calibration: Vec<CalibrationEvent>,
    pub orientations: Vec<CorrectedOrientation>,
    /// Calibration status after this tick; repeated every tick
    pub calibrated: bool,
    pub calibrations: u64,
}

// ─── The pipeline ────────────────────────────────────────────────────────────

pub struct OrientationPipeline {
    config: TrackerConfig,
    framer: LineFramer,
    channels: Vec<ChannelSlot>,
    calibration: CalibrationController,
    stats: PipelineStats,
}

impl OrientationPipeline {
    pub fn new(config: TrackerConfig) -> Self {
        let channels = (0..config.channel_count).map(|_| ChannelSlot::new(&config)).collect();
        Self {
            framer: LineFramer::with_limit(config.max_buffer_bytes),
            calibration: CalibrationController::new(config.channel_count),
            channels,
            stats: PipelineStats::default(),
            config,
        }
    }

    // ── Ingest ───────────────────────────────────────────────────────────

    /// Frame, decode and filter everything complete in `chunk`.
    ///
    /// Bad records are dropped one by one; they never stop the rest of the
    /// batch and never touch another channel's state.
    pub fn on_bytes(&mut self, chunk: &[u8]) -> IngestReport {
        let mut report = IngestReport::default();
        self.stats.bytes += chunk.len() as u64;

        let lines: Vec<String> = self.framer.feed(chunk).collect();
        for line in lines {
            report.lines += 1;
            self.stats.lines += 1;
            if line.is_empty() {
                self.stats.blank_lines += 1;
                continue;
            }
            match self.ingest_line(&line) {
                Ok(_) => report.accepted += 1,
                Err(e) => {
                    log::debug!("Dropped record {:?}: {}", line, e);
                    report.rejected.push(e);
                }
            }
        }

        if let Err(e) = self.framer.check_overflow() {
            self.stats.buffer_overflows += 1;
            report.overflow = Some(e);
        }

        report
    }

    /// Decode one line and fold it into its channel. Returns the channel.
    pub fn ingest_line(&mut self, line: &str) -> Result<usize, RecordError> {
        let record = match decode(line) {
            Ok(r) => r,
            Err(e) => {
                self.stats.malformed += 1;
                return Err(e.into());
            }
        };

        let channel_count = self.channels.len();
        let slot = usize::try_from(record.channel)
            .ok()
            .and_then(|idx| self.channels.get_mut(idx).map(|slot| (idx, slot)));
        let Some((channel, slot)) = slot else {
            self.stats.out_of_range += 1;
            return Err(RecordError::ChannelOutOfRange {
                channel: record.channel,
                channel_count,
            });
        };

        let raw = remap(record.sample);
        slot.latest_raw = Some(raw);
        slot.filtered = Some(slot.filter.update(raw));
        slot.records += 1;
        self.stats.records_accepted += 1;
        Ok(channel)
    }

    // ── Calibration ──────────────────────────────────────────────────────

    /// Queue a recalibration; it takes effect at the next tick
    pub fn on_calibrate_request(&mut self, delay_secs: f64) {
        self.calibration.request(delay_secs);
    }

    pub fn request_startup_calibration(&mut self) {
        self.on_calibrate_request(self.config.startup_calibration_delay_secs);
    }

    pub fn request_manual_calibration(&mut self) {
        self.on_calibrate_request(self.config.manual_calibration_delay_secs);
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    /// Advance calibration and emit corrected orientations.
    ///
    /// Nothing is emitted before the first calibration completes. After that,
    /// every channel that has seen a valid record emits once per tick; when
    /// correction is impossible (zero-norm estimate) the previous value is
    /// repeated.
    pub fn on_tick(&mut self, now: f64) -> TickOutput {
        self.stats.ticks += 1;

        let channels = &self.channels;
        let calibration = self
            .calibration
            .tick(now, |ch| channels.get(ch).and_then(|s| s.latest_raw));

        let mut orientations = Vec::new();
        if self.calibration.is_calibrated() {
            for (channel, slot) in self.channels.iter_mut().enumerate() {
                let Some(filtered) = slot.filtered else {
                    continue;
                };
                let offset = self.calibration.offset(channel).unwrap_or(Orientation::IDENTITY);
                match correct(offset, filtered) {
                    Some(corrected) => slot.last_corrected = Some(corrected),
                    None => {
                        self.stats.degenerate_corrections += 1;
                        log::debug!("Channel {}: cannot correct {:?} by {:?}", channel, filtered, offset);
                    }
                }
                if let Some(orientation) = slot.last_corrected {
                    orientations.push(CorrectedOrientation { channel, orientation });
                }
            }
        }
        self.stats.emissions += orientations.len() as u64;

        TickOutput {
            now,
            calibration,
            orientations,
            calibrated: self.calibration.is_calibrated(),
            calibrations: self.calibration.completions(),
        }
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn record_transport_error(&mut self) {
        self.stats.transport_errors += 1;
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_calibrated()
    }

    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    pub fn channel(&self, channel: usize) -> Option<&ChannelSlot> {
        self.channels.get(channel)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.framer.buffered_len()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn channel_snapshots(&self) -> Vec<ChannelSnapshot> {
        self.channels
            .iter()
            .enumerate()
            .map(|(channel, slot)| ChannelSnapshot {
                channel,
                records: slot.records,
                latest_raw: slot.latest_raw,
                filtered: slot.filtered,
                corrected: slot.last_corrected,
                offset: self.calibration.offset(channel),
                error_variance: slot.filter.error_variances(),
            })
            .collect()
    }

    /// Back to the freshly constructed state, config kept
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pipeline() -> OrientationPipeline {
        OrientationPipeline::new(TrackerConfig::default())
    }

    #[test]
    fn test_no_output_before_calibration() {
        let mut p = pipeline();
        p.on_bytes(b"0,1,0,0,0\n1,1,0,0,0\n");
        for i in 0..10 {
            assert!(p.on_tick(i as f64).orientations.is_empty());
        }
        assert!(!p.is_calibrated());
    }

    #[test]
    fn test_emits_unit_orientations_after_calibration() {
        let mut p = pipeline();
        p.on_bytes(b"0,0.9,0.1,0.2,0.3\n2,0.5,0.5,0.5,0.5\n");
        p.on_calibrate_request(1.0);
        assert!(p.on_tick(0.0).orientations.is_empty());

        let out = p.on_tick(1.0);
        assert_eq!(out.calibration.len(), 1);
        let channels: Vec<usize> = out.orientations.iter().map(|o| o.channel).collect();
        assert_eq!(channels, vec![0, 2]);
        for o in &out.orientations {
            assert_abs_diff_eq!(o.orientation.norm(), 1.0, epsilon = 1e-9);
        }

        // Keeps emitting every tick without new data
        assert_eq!(p.on_tick(2.0).orientations.len(), 2);
    }

    #[test]
    fn test_offset_is_raw_snapshot_not_filtered() {
        let mut p = pipeline();
        p.on_bytes(b"1,0.5,0.5,0.5,0.5\n");
        p.on_calibrate_request(0.0);
        p.on_tick(0.0);

        let raw = remap(crate::types::RawSample::new(0.5, 0.5, 0.5, 0.5));
        assert_eq!(p.calibration().offset(1), Some(raw));
        assert_ne!(p.channel(1).unwrap().filtered(), Some(raw));
    }

    #[test]
    fn test_calibrated_pose_corrects_to_identity() {
        let mut p = pipeline();
        let line = b"0,0.8,0.2,-0.4,0.4\n";
        // Let the filter settle on the pose first
        for _ in 0..100 {
            p.on_bytes(line);
        }
        p.on_calibrate_request(0.0);
        p.on_tick(0.0);

        p.on_bytes(line);
        let out = p.on_tick(0.1);
        let o = out.orientations[0].orientation;
        assert_abs_diff_eq!(o.w.abs(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(o.x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(o.y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(o.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_malformed_record_isolated() {
        let mut p = pipeline();
        let report = p.on_bytes(b"1,1,0,0,0\n0,abc,0,0,0\n");
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 1);
        let after_first = p.channel(1).unwrap().filter().clone();

        // Same sequence minus the bad line gives the same channel-1 state
        let mut reference = pipeline();
        reference.on_bytes(b"1,1,0,0,0\n");
        assert_eq!(
            after_first.error_variances(),
            reference.channel(1).unwrap().filter().error_variances()
        );

        p.on_bytes(b"1,0,1,0,0\n");
        reference.on_bytes(b"1,0,1,0,0\n");
        assert_eq!(p.channel(1).unwrap().filtered(), reference.channel(1).unwrap().filtered());
        assert_eq!(p.channel(0).unwrap().records(), 0);
        assert_eq!(p.stats().malformed, 1);
    }

    #[test]
    fn test_out_of_range_channels_dropped() {
        let mut p = pipeline();
        let report = p.on_bytes(b"3,1,0,0,0\n-1,1,0,0,0\n2,1,0,0,0\n");
        assert_eq!(report.accepted, 1);
        assert_eq!(
            report.rejected,
            vec![
                RecordError::ChannelOutOfRange { channel: 3, channel_count: 3 },
                RecordError::ChannelOutOfRange { channel: -1, channel_count: 3 },
            ]
        );
        assert_eq!(p.stats().out_of_range, 2);
        assert_eq!(p.channel(2).unwrap().records(), 1);
    }

    #[test]
    fn test_blank_lines_are_not_errors() {
        let mut p = pipeline();
        let report = p.on_bytes(b"\r\n\n0,1,0,0,0\n");
        assert_eq!(report.lines, 3);
        assert!(report.rejected.is_empty());
        assert_eq!(p.stats().blank_lines, 2);
    }

    #[test]
    fn test_partial_record_waits_for_newline() {
        let mut p = pipeline();
        assert_eq!(p.on_bytes(b"0,1,0,").accepted, 0);
        assert_eq!(p.buffered_bytes(), 6);
        assert_eq!(p.on_bytes(b"0,0\n").accepted, 1);
        assert_eq!(p.buffered_bytes(), 0);
    }

    #[test]
    fn test_degenerate_estimate_repeats_last_output() {
        let mut p = pipeline();
        p.on_bytes(b"0,1,0,0,0\n");
        p.on_calibrate_request(0.0);
        let first = p.on_tick(0.0).orientations[0];

        // All-zero samples shrink the estimate below any usable norm
        for _ in 0..400 {
            p.on_bytes(b"0,0,0,0,0\n");
        }
        let out = p.on_tick(1.0);
        assert_eq!(out.orientations, vec![first]);
        assert_eq!(p.stats().degenerate_corrections, 1);
    }

    #[test]
    fn test_buffer_guard_counts_overflow() {
        let mut config = TrackerConfig::default();
        config.max_buffer_bytes = Some(8);
        let mut p = OrientationPipeline::new(config);

        let report = p.on_bytes(b"garbage-without-newline");
        assert!(report.overflow.is_some());
        assert_eq!(p.stats().buffer_overflows, 1);
        assert_eq!(p.buffered_bytes(), 0);
        assert_eq!(p.on_bytes(b"0,1,0,0,0\n").accepted, 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut p = pipeline();
        p.on_bytes(b"0,1,0,0,0\n0,1");
        p.on_calibrate_request(0.0);
        p.on_tick(0.0);
        p.reset();

        assert!(!p.is_calibrated());
        assert_eq!(p.buffered_bytes(), 0);
        assert_eq!(p.channel(0).unwrap().records(), 0);
        assert_eq!(p.stats(), &PipelineStats::default());
    }

    #[test]
    fn test_filter_state_survives_recalibration() {
        let mut p = pipeline();
        p.on_bytes(b"0,1,0,0,0\n");
        p.on_calibrate_request(0.0);
        p.on_tick(0.0);
        let before = p.channel(0).unwrap().filter().clone();

        p.request_manual_calibration();
        p.on_tick(1.0);
        let after = p.channel(0).unwrap().filter();
        assert_eq!(before.estimate(), after.estimate());
        assert_eq!(before.error_variances(), after.error_variances());
        assert_eq!(p.calibration().completions(), 2);
    }
}
