/*!
Error types for the LD2450 driver and acquisition pipeline.

Failures are split by how far they propagate: framing and negative
acknowledgements are retried inside a single command transaction, data-frame
anomalies are dropped by the stream decoder, and channel failures tear down
the current connection.
*/

use std::fmt;

use thiserror::Error;

/// Common result type used throughout the crate
pub type Result<T> = std::result::Result<T, CoreError>;

/// A command response that could not be framed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// No command header anywhere in the raw response
    #[error("no command header in response ({received} bytes received)")]
    MissingHeader { received: usize },

    /// Response does not end with the command footer
    #[error("response is not terminated by the command footer")]
    MissingFooter,

    /// Payload too short to carry the length and ack fields
    #[error("response payload too short: {len} bytes")]
    TooShort { len: usize },

    /// Length field disagrees with the payload actually received
    #[error("length field says {declared} bytes, payload carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// A streaming data frame that failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeAnomaly {
    /// Chunk shorter than one data frame
    #[error("data chunk too short: {len} bytes")]
    Truncated { len: usize },

    /// Chunk does not end with the data footer
    #[error("data chunk is not terminated by the data footer")]
    MissingFooter,

    /// Bytes where the data header should be
    #[error("invalid data header: {found}")]
    BadHeader { found: String },
}

/// Phase of a configuration-mode transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    EnterConfig,
    SendCommand,
    ExitConfig,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::EnterConfig => "enter configuration",
            Phase::SendCommand => "send command",
            Phase::ExitConfig => "exit configuration",
        };
        f.write_str(name)
    }
}

/// Errors raised while talking to the radar in configuration mode
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Response could not be framed
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Device answered with a nonzero ack status
    #[error("no acknowledge for command {word:#06X} (status {status:#06X})")]
    NegativeAck { word: u16, status: u16 },

    /// Reply belongs to a different command (late reply to an earlier request)
    #[error("reply for command {found:#06X} while waiting for {expected:#06X}")]
    WordMismatch { expected: u16, found: u16 },

    /// Serial I/O failed during the exchange
    #[error("serial I/O error: {0}")]
    Channel(#[from] std::io::Error),

    /// Command transaction gave up
    #[error("command {word:#06X} failed during {phase} in cycle {cycle}: {source}")]
    Execution {
        word: u16,
        phase: Phase,
        cycle: u32,
        #[source]
        source: Box<ProtocolError>,
    },

    /// Acknowledged response whose payload cannot be interpreted
    #[error("unexpected payload for command {word:#06X}: {reason}")]
    UnexpectedPayload { word: u16, reason: String },

    /// Caller passed a value the device does not accept
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ProtocolError {
    /// Whether retrying the same exchange on the same link can succeed.
    /// Serial I/O failures end the connection instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Framing(_) | Self::NegativeAck { .. } | Self::WordMismatch { .. }
        )
    }

    /// Whether the serial link itself failed, directly or inside a
    /// transaction that gave up
    pub fn is_link_failure(&self) -> bool {
        match self {
            Self::Channel(_) => true,
            Self::Execution { source, .. } => source.is_link_failure(),
            _ => false,
        }
    }

    /// Create an unexpected payload error
    pub fn unexpected_payload(word: u16, reason: impl Into<String>) -> Self {
        Self::UnexpectedPayload {
            word,
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Failures that end the current serial connection
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Opening or using the port failed
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No bytes arrived within the read timeout
    #[error("no data within the read timeout")]
    Timeout,

    /// Device configuration failed while connecting
    #[error("device configuration failed: {0}")]
    Configuration(#[from] ProtocolError),
}

/// Umbrella error for the crate
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Sliding window created with zero capacity
    #[error("invalid window size: {0}")]
    InvalidWindow(usize),

    /// Mapper created with an empty or inverted input range
    #[error("invalid mapping range: {0}")]
    InvalidRange(String),
}

impl CoreError {
    /// Create an invalid range error
    pub fn invalid_range(msg: impl Into<String>) -> Self {
        Self::InvalidRange(msg.into())
    }
}
