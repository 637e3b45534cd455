//! Multi-channel orientation tracking from a newline-delimited quaternion
//! stream: framing, decoding, per-component Kalman smoothing and
//! zero-reference calibration, driven one host tick at a time.

pub mod calibration;
pub mod config;
pub mod dashboard;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod filters;
pub mod framing;
pub mod health_monitor;
pub mod live_status;
pub mod pipeline;
pub mod remap;
pub mod rerun_logger;
pub mod sink;
pub mod source;
pub mod types;

pub use calibration::{CalibrationController, CalibrationEvent, CalibrationState};
pub use config::TrackerConfig;
pub use driver::PipelineDriver;
pub use error::{ConfigError, DecodeError, FramingError, RecordError, TransportError};
pub use filters::{ChannelFilter, FilterParams, ScalarKalman};
pub use pipeline::{OrientationPipeline, PipelineStats, TickOutput};
pub use sink::{JsonLinesSink, OrientationSink};
pub use source::ByteSource;
pub use types::{CorrectedOrientation, Orientation, RawSample};
