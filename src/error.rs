use thiserror::Error;

/// Record-level decode failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Malformed record: expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("Malformed record: bad channel field {0:?}")]
    BadChannel(String),

    #[error("Malformed record: bad component field {index} ({value:?})")]
    BadComponent { index: usize, value: String },
}

/// Reasons a framed line was dropped by the pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error(transparent)]
    Malformed(#[from] DecodeError),

    #[error("Channel {channel} out of range (tracking {channel_count} channels)")]
    ChannelOutOfRange { channel: i64, channel_count: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FramingError {
    #[error("Line buffer exceeded {limit} bytes without a newline ({discarded} bytes discarded)")]
    BufferOverflow { limit: usize, discarded: usize },
}

/// Byte source failures. Recoverable per tick except at open time.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(String),

    #[error("Source already closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("channel_count must be at least 1")]
    NoChannels,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}
