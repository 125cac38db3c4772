//! Shared error type across pktin crates.

use thiserror::Error;

/// Stable error categories, used as log fields and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Switch refused a reason-coded subscription.
    Subscription,
    /// Packet-in lacks an expected match field or payload.
    Decode,
    /// Any other handler-reported failure.
    Handler,
    /// Bounded queue is full; the event was dropped.
    QueueOverflow,
    /// Queue already shut down.
    QueueClosed,
    /// Invalid configuration.
    Config,
    /// Unsupported config version.
    UnsupportedVersion,
    /// File system / OS error.
    Io,
}

impl ErrorKind {
    /// String representation used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Subscription => "SUBSCRIPTION",
            ErrorKind::Decode => "DECODE",
            ErrorKind::Handler => "HANDLER",
            ErrorKind::QueueOverflow => "QUEUE_OVERFLOW",
            ErrorKind::QueueClosed => "QUEUE_CLOSED",
            ErrorKind::Config => "CONFIG",
            ErrorKind::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorKind::Io => "IO",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, PacketInError>;

/// Unified error type used by core and agent.
#[derive(Debug, Error)]
pub enum PacketInError {
    #[error("subscribe packet-in for reason {reason} failed: {msg}")]
    Subscription { reason: u8, msg: String },
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("queue overflow")]
    QueueOverflow,
    #[error("queue is shut down")]
    QueueClosed,
    #[error("invalid config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl PacketInError {
    pub fn decode(msg: impl Into<String>) -> Self {
        PacketInError::Decode(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        PacketInError::Handler(msg.into())
    }

    /// Map to a stable category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PacketInError::Subscription { .. } => ErrorKind::Subscription,
            PacketInError::Decode(_) => ErrorKind::Decode,
            PacketInError::Handler(_) => ErrorKind::Handler,
            PacketInError::QueueOverflow => ErrorKind::QueueOverflow,
            PacketInError::QueueClosed => ErrorKind::QueueClosed,
            PacketInError::Config(_) => ErrorKind::Config,
            PacketInError::UnsupportedVersion => ErrorKind::UnsupportedVersion,
            PacketInError::Io(_) => ErrorKind::Io,
        }
    }
}
