use crate::types::{Orientation, RawSample};

/// Sensor frame to consumer frame: `(x, y, z, w) = (-q2, q4, q3, q1)`
pub fn remap(raw: RawSample) -> Orientation {
    Orientation::new(-raw.q2, raw.q4, raw.q3, raw.q1)
}
