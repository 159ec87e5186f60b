//! Channel Error Types
//!
//! Core error types for the framed channel engine and its transports.

use thiserror::Error;

/// Result type for plclink-channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Channel and transport errors
#[derive(Debug, Error, Clone)]
pub enum ChannelError {
    /// Connect step failed
    #[error("Connect error: {0}")]
    Connect(String),

    /// Raw read failed
    #[error("Read error: {0}")]
    Read(String),

    /// Raw write failed
    #[error("Write error: {0}")]
    Write(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Peer closed the connection
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Request/response exchange timed out
    #[error("SendReceive timeout after {0} ms")]
    Timeout(u64),
}

/// Coarse error classification used by the per-channel report
/// de-duplication set: each kind is reported once until reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connect,
    Read,
    Write,
    NotConnected,
    PeerClosed,
    Serial,
    Timeout,
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Read(err.to_string())
    }
}

impl From<tokio_serial::Error> for ChannelError {
    fn from(err: tokio_serial::Error) -> Self {
        ChannelError::Serial(err.to_string())
    }
}

// Helper methods for creating errors
impl ChannelError {
    pub fn connect(msg: impl Into<String>) -> Self {
        ChannelError::Connect(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        ChannelError::Read(msg.into())
    }

    pub fn write(msg: impl Into<String>) -> Self {
        ChannelError::Write(msg.into())
    }

    pub fn serial(msg: impl Into<String>) -> Self {
        ChannelError::Serial(msg.into())
    }

    /// Classification used by the error de-duplication set
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Connect(_) => ErrorKind::Connect,
            ChannelError::Read(_) => ErrorKind::Read,
            ChannelError::Write(_) => ErrorKind::Write,
            ChannelError::NotConnected => ErrorKind::NotConnected,
            ChannelError::PeerClosed => ErrorKind::PeerClosed,
            ChannelError::Serial(_) => ErrorKind::Serial,
            ChannelError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::connect("refused");
        assert_eq!(err.to_string(), "Connect error: refused");

        let err = ChannelError::Timeout(5000);
        assert_eq!(err.to_string(), "SendReceive timeout after 5000 ms");
    }

    #[test]
    fn test_error_kind_groups_variants() {
        assert_eq!(ChannelError::connect("a").kind(), ErrorKind::Connect);
        assert_eq!(ChannelError::connect("b").kind(), ErrorKind::Connect);
        assert_ne!(ChannelError::read("a").kind(), ChannelError::write("a").kind());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err: ChannelError = io.into();
        assert_eq!(err.kind(), ErrorKind::Read);
    }
}
