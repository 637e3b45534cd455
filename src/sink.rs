use std::io::Write;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationEvent;
use crate::pipeline::TickOutput;

/// Consumer of per-tick corrected orientations (rig, recorder, viewer)
pub trait OrientationSink {
    fn apply(&mut self, output: &TickOutput) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One line of JSON-lines output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputRecord {
    Orientation {
        t: f64,
        channel: usize,
        x: f64,
        y: f64,
        z: f64,
        w: f64,
    },
    Calibrated {
        t: f64,
        channels: usize,
    },
}

/// Writes one JSON object per emitted orientation
pub struct JsonLinesSink<W: Write> {
    writer: W,
    records_written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, records_written: 0 }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &OutputRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.records_written += 1;
        Ok(())
    }
}

impl<W: Write> OrientationSink for JsonLinesSink<W> {
    fn apply(&mut self, output: &TickOutput) -> Result<()> {
        for event in &output.calibration {
            if let CalibrationEvent::Completed { at, offsets } = event {
                self.write_record(&OutputRecord::Calibrated {
                    t: *at,
                    channels: offsets.len(),
                })?;
            }
        }
        for o in &output.orientations {
            self.write_record(&OutputRecord::Orientation {
                t: output.now,
                channel: o.channel,
                x: o.orientation.x,
                y: o.orientation.y,
                z: o.orientation.z,
                w: o.orientation.w,
            })?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrectedOrientation, Orientation};

    #[test]
    fn test_json_lines_output() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let output = TickOutput {
            now: 1.5,
            calibration: vec![CalibrationEvent::Completed {
                at: 1.5,
                offsets: vec![Orientation::IDENTITY; 3],
            }],
            orientations: vec![CorrectedOrientation {
                channel: 2,
                orientation: Orientation::IDENTITY,
            }],
            calibrated: true,
            calibrations: 1,
        };
        sink.apply(&output).unwrap();
        assert_eq!(sink.records_written(), 2);

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let records: Vec<OutputRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records[0], OutputRecord::Calibrated { t: 1.5, channels: 3 });
        assert_eq!(
            records[1],
            OutputRecord::Orientation { t: 1.5, channel: 2, x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
        );
    }

    #[test]
    fn test_empty_tick_writes_nothing() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.apply(&TickOutput::default()).unwrap();
        assert!(sink.into_inner().is_empty());
    }
}
