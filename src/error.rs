//! Error types for the WebSocket codec
//!
//! "Not enough bytes yet" is never an error: decode entry points return
//! `Ok(None)` for that. Everything here is either fatal to the connection
//! ([`ErrorKind::ProtocolViolation`]) or fatal to a single send/handshake
//! operation ([`ErrorKind::ResourceExhausted`]).

use std::fmt;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Codec error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid WebSocket frame
    InvalidFrame(&'static str),
    /// Invalid UTF-8 in text payload or close reason
    InvalidUtf8,
    /// Protocol violation
    Protocol(&'static str),
    /// Assembled message exceeds the configured ceiling
    MessageTooLarge,
    /// Declared frame length exceeds the configured ceiling
    FrameTooLarge,
    /// Malformed HTTP in the opening handshake
    InvalidHttp(&'static str),
    /// Handshake failed
    HandshakeFailed(&'static str),
    /// Invalid close code
    InvalidCloseCode(u16),
    /// Destination buffer smaller than the reserved chunk
    BufferTooSmall {
        /// Bytes the chunk needs
        needed: usize,
        /// Bytes the caller supplied
        available: usize,
    },
    /// Secure random source failed
    Random,
    /// Operation called in a state where it cannot proceed
    InvalidState(&'static str),
}

/// Coarse classification the engine acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer broke the protocol; close/reset the connection
    ProtocolViolation,
    /// Only the current send or handshake operation failed
    ResourceExhausted,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BufferTooSmall { .. } | Error::Random | Error::InvalidState(_) => {
                ErrorKind::ResourceExhausted
            }
            _ => ErrorKind::ProtocolViolation,
        }
    }

    /// True if the connection must be torn down
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::ProtocolViolation
    }

    /// Close status code matching this error, for engines that answer a
    /// violation with a close frame before resetting
    pub fn close_code(&self) -> u16 {
        match self {
            Error::InvalidUtf8 => CloseReason::INVALID_PAYLOAD,
            Error::MessageTooLarge | Error::FrameTooLarge => CloseReason::TOO_BIG,
            Error::BufferTooSmall { .. } | Error::Random | Error::InvalidState(_) => {
                CloseReason::INTERNAL
            }
            _ => CloseReason::PROTOCOL_ERROR,
        }
    }
}

/// Close frame reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code
    pub code: u16,
    /// Optional reason string
    pub reason: String,
}

impl CloseReason {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Going away (e.g., server shutdown)
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Unsupported data
    pub const UNSUPPORTED: u16 = 1003;
    /// No status received
    pub const NO_STATUS: u16 = 1005;
    /// Abnormal closure
    pub const ABNORMAL: u16 = 1006;
    /// Invalid frame payload
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Policy violation
    pub const POLICY: u16 = 1008;
    /// Message too big
    pub const TOO_BIG: u16 = 1009;
    /// Mandatory extension
    pub const EXTENSION: u16 = 1010;
    /// Internal server error
    pub const INTERNAL: u16 = 1011;

    /// Create a new close reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Check if the close code may appear on the wire per RFC 6455
    pub fn is_valid_code(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            Error::InvalidUtf8 => write!(f, "Invalid UTF-8 in payload"),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::MessageTooLarge => write!(f, "Message too large"),
            Error::FrameTooLarge => write!(f, "Frame too large"),
            Error::InvalidHttp(msg) => write!(f, "Invalid HTTP: {}", msg),
            Error::HandshakeFailed(msg) => write!(f, "Handshake failed: {}", msg),
            Error::InvalidCloseCode(code) => write!(f, "Invalid close code: {}", code),
            Error::BufferTooSmall { needed, available } => write!(
                f,
                "Buffer too small: chunk needs {} bytes, {} available",
                needed, available
            ),
            Error::Random => write!(f, "Secure random generation failed"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
