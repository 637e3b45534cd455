//! Per-component scalar Kalman smoothing
//!
//! Each orientation component is treated as a stationary scalar observed
//! through additive noise:
//!
//!   gain  = P / (P + R)
//!   x'    = x + gain * (z - x)
//!   P'    = (1 - gain) * P + Q
//!
//! There is no prediction model and no cross-component covariance, so the
//! four filtered components of a channel need not stay on the unit sphere.

use serde::{Deserialize, Serialize};

use crate::types::{Orientation, COMPONENT_COUNT};

pub const DEFAULT_PROCESS_NOISE: f64 = 0.01;
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 0.1;
pub const DEFAULT_INITIAL_ERROR_VARIANCE: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Q, added to the error variance after every update
    pub process_noise: f64,
    /// R, the assumed measurement variance
    pub measurement_noise: f64,
    /// P at construction and after reset
    pub initial_error_variance: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            initial_error_variance: DEFAULT_INITIAL_ERROR_VARIANCE,
        }
    }
}

/// Fixed point of the variance recursion: `v² = q·v + q·r`
pub fn steady_state_variance(process_noise: f64, measurement_noise: f64) -> f64 {
    let q = process_noise;
    let r = measurement_noise;
    0.5 * (q + (q * q + 4.0 * q * r).sqrt())
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarKalman {
    estimate: f64,
    error_variance: f64,
}

impl ScalarKalman {
    pub fn new(initial_error_variance: f64) -> Self {
        Self {
            estimate: 0.0,
            error_variance: initial_error_variance,
        }
    }

    /// Blend one measurement in and return the new estimate
    pub fn update(&mut self, measurement: f64, params: &FilterParams) -> f64 {
        let gain = self.error_variance / (self.error_variance + params.measurement_noise);
        self.estimate += gain * (measurement - self.estimate);
        self.error_variance = (1.0 - gain) * self.error_variance + params.process_noise;
        self.estimate
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn error_variance(&self) -> f64 {
        self.error_variance
    }
}

/// The four independent component filters of one channel
#[derive(Clone, Debug)]
pub struct ChannelFilter {
    components: [ScalarKalman; COMPONENT_COUNT],
    params: FilterParams,
    updates: u64,
}

impl ChannelFilter {
    pub fn new(params: FilterParams) -> Self {
        Self {
            components: [ScalarKalman::new(params.initial_error_variance); COMPONENT_COUNT],
            params,
            updates: 0,
        }
    }

    pub fn update(&mut self, measurement: Orientation) -> Orientation {
        let z = measurement.components();
        let mut out = [0.0; COMPONENT_COUNT];
        for ((filter, value), slot) in self.components.iter_mut().zip(z).zip(out.iter_mut()) {
            *slot = filter.update(value, &self.params);
        }
        self.updates += 1;
        Orientation::from_components(out)
    }

    pub fn estimate(&self) -> Orientation {
        let mut out = [0.0; COMPONENT_COUNT];
        for (filter, slot) in self.components.iter().zip(out.iter_mut()) {
            *slot = filter.estimate();
        }
        Orientation::from_components(out)
    }

    /// Error variances in x, y, z, w order
    pub fn error_variances(&self) -> [f64; COMPONENT_COUNT] {
        let mut out = [0.0; COMPONENT_COUNT];
        for (filter, slot) in self.components.iter().zip(out.iter_mut()) {
            *slot = filter.error_variance();
        }
        out
    }

    pub fn component(&self, index: usize) -> Option<&ScalarKalman> {
        self.components.get(index)
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_first_update_from_default_state() {
        let params = FilterParams::default();
        let mut kf = ScalarKalman::new(params.initial_error_variance);
        let est = kf.update(1.0, &params);

        // gain = 1 / 1.1
        assert_relative_eq!(est, 1.0 / 1.1, epsilon = 1e-12);
        assert_relative_eq!(kf.error_variance(), (1.0 - 1.0 / 1.1) + 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_estimate_is_blend_not_assignment() {
        let params = FilterParams::default();
        let mut kf = ScalarKalman::new(params.initial_error_variance);
        kf.update(5.0, &params);
        assert!(kf.estimate() < 5.0);
        assert!(kf.estimate() > 0.0);
    }

    #[test]
    fn test_monotonic_convergence_to_constant() {
        let params = FilterParams::default();
        let mut kf = ScalarKalman::new(params.initial_error_variance);
        let target = -0.7;
        let mut last_distance = (kf.estimate() - target).abs();

        for _ in 0..200 {
            kf.update(target, &params);
            let distance = (kf.estimate() - target).abs();
            assert!(distance <= last_distance);
            last_distance = distance;
        }
        assert_abs_diff_eq!(kf.estimate(), target, epsilon = 1e-9);
    }

    #[test]
    fn test_variance_reaches_fixed_point() {
        let params = FilterParams::default();
        let mut kf = ScalarKalman::new(params.initial_error_variance);
        for _ in 0..500 {
            kf.update(0.3, &params);
        }

        let v_star = steady_state_variance(params.process_noise, params.measurement_noise);
        assert_relative_eq!(kf.error_variance(), v_star, epsilon = 1e-10);

        // v* satisfies its own recursion
        let q = params.process_noise;
        let r = params.measurement_noise;
        let next = (1.0 - v_star / (v_star + r)) * v_star + q;
        assert_relative_eq!(next, v_star, epsilon = 1e-12);
    }

    #[test]
    fn test_channel_components_are_independent() {
        let mut filter = ChannelFilter::new(FilterParams::default());
        filter.update(Orientation::new(1.0, 0.0, 0.0, 0.0));
        filter.update(Orientation::new(1.0, 0.0, 0.0, 0.0));

        let est = filter.estimate();
        assert!(est.x > 0.9);
        assert_eq!(est.y, 0.0);
        assert_eq!(est.z, 0.0);
        assert_eq!(est.w, 0.0);

        // Variances evolve identically since they do not depend on measurements
        let vars = filter.error_variances();
        assert!(vars.iter().all(|v| (v - vars[0]).abs() < 1e-15));
        assert_eq!(filter.update_count(), 2);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut filter = ChannelFilter::new(FilterParams::default());
        filter.update(Orientation::IDENTITY);
        filter.reset();

        assert_eq!(filter.estimate(), Orientation::new(0.0, 0.0, 0.0, 0.0));
        assert_eq!(filter.error_variances(), [1.0; 4]);
        assert_eq!(filter.update_count(), 0);
    }
}
