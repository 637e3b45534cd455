//! Quaternion helpers shared by the calibration and correction stages
//!
//! Orientation components travel as plain `(x, y, z, w)` structs; nalgebra is
//! only brought in where quaternion algebra is needed.

use nalgebra::{Quaternion, UnitQuaternion};

use super::Orientation;

// ===== Dimensions =====
pub const COMPONENT_COUNT: usize = 4; // x, y, z, w
pub const DEFAULT_CHANNEL_COUNT: usize = 3;

/// Norms below this are treated as degenerate (cannot be normalized or inverted)
pub const DEGENERATE_NORM: f64 = 1e-9;

pub type Quat = Quaternion<f64>;
pub type UnitQuat = UnitQuaternion<f64>;

impl From<Orientation> for Quat {
    fn from(o: Orientation) -> Self {
        // nalgebra takes the scalar part first
        Quaternion::new(o.w, o.x, o.y, o.z)
    }
}

impl From<Quat> for Orientation {
    fn from(q: Quat) -> Self {
        Orientation::new(q.i, q.j, q.k, q.w)
    }
}

impl From<UnitQuat> for Orientation {
    fn from(q: UnitQuat) -> Self {
        Orientation::from(q.into_inner())
    }
}

/// `normalize(inverse(offset) * filtered)`
///
/// Returns `None` when the offset is not invertible or the product has no
/// usable direction.
pub fn correct(offset: Orientation, filtered: Orientation) -> Option<Orientation> {
    let inv = Quat::from(offset).try_inverse()?;
    let product = inv * Quat::from(filtered);
    UnitQuaternion::try_new(product, DEGENERATE_NORM).map(Orientation::from)
}
