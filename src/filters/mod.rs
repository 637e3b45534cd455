pub mod scalar_kalman;

pub use scalar_kalman::{steady_state_variance, ChannelFilter, FilterParams, ScalarKalman};
