pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Quaternion components in the consumer's frame. Not guaranteed unit length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Orientation {
    pub const IDENTITY: Orientation = Orientation { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Components in filter order
    pub fn components(&self) -> [f64; COMPONENT_COUNT] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn from_components(c: [f64; COMPONENT_COUNT]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Sensor-native components in wire order (q1..q4)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
    pub q4: f64,
}

impl RawSample {
    pub fn new(q1: f64, q2: f64, q3: f64, q4: f64) -> Self {
        Self { q1, q2, q3, q4 }
    }
}

/// One decoded wire record. The channel is unvalidated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedRecord {
    pub channel: i64,
    pub sample: RawSample,
}

/// Offset-corrected, unit-length orientation for one channel
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectedOrientation {
    pub channel: usize,
    pub orientation: Orientation,
}
