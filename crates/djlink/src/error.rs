// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error types.

use std::io;

use crate::protocol::ParseError;

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Client error types.
#[derive(Debug)]
pub enum Error {
    /// A request named a device that is not in the registry.
    UnknownDevice(u8),

    /// Establishing a connection to a device failed.
    ConnectionFailed(String),

    /// The peer closed the connection (0-byte read).
    ConnectionClosed,

    /// A reply could not be decoded.
    Parse(ParseError),

    /// The peer answered, but with a failure or an unexpected shape.
    Protocol(String),

    /// The receive retry budget was spent without a complete reply.
    ReceiveTimeout {
        /// Number of read attempts made.
        tries: u32,
    },

    /// Configuration error.
    Config(&'static str),

    /// I/O error.
    Io(io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDevice(n) => write!(f, "Device {} not found in registry", n),
            Self::ConnectionFailed(s) => write!(f, "Connection failed: {}", s),
            Self::ConnectionClosed => write!(f, "Connection closed by peer"),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::Protocol(s) => write!(f, "Protocol error: {}", s),
            Self::ReceiveTimeout { tries } => {
                write!(f, "No complete reply after {} receive attempts", tries)
            }
            Self::Config(s) => write!(f, "Configuration error: {}", s),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl Error {
    /// True when the error leaves the connection in an unusable state.
    ///
    /// Byte-stream exchanges have no resynchronization point: after an I/O
    /// failure, an EOF or a spent retry budget the stream may hold a partial
    /// reply, so the connection must be discarded. A cleanly parsed error
    /// reply keeps the stream in sync.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::ReceiveTimeout { .. } | Self::Parse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownDevice(3);
        assert!(err.to_string().contains("Device 3"));

        let err = Error::ConnectionClosed;
        assert!(err.to_string().contains("closed"));

        let err = Error::ReceiveTimeout { tries: 30 };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_poisons_connection() {
        assert!(Error::ConnectionClosed.poisons_connection());
        assert!(Error::ReceiveTimeout { tries: 40 }.poisons_connection());
        assert!(!Error::Protocol("invalid_request".into()).poisons_connection());
        assert!(!Error::UnknownDevice(1).poisons_connection());
    }
}
