//! Error types for potlink
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for potlink operations
pub type Result<T> = std::result::Result<T, PotlinkError>;

/// Main error type for potlink operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PotlinkError {
    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Link error
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

/// Errors from the JSON builder
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// An append ran past the builder's capacity; the error is sticky
    #[error("Buffer overflow: message exceeds {capacity} bytes")]
    Overflow { capacity: usize },

    /// finish() called with open objects or arrays
    #[error("Unbalanced document: {depth} scope(s) still open")]
    Unbalanced { depth: u8 },
}

/// Errors while parsing an inbound envelope
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The mandatory type field is absent
    #[error("Message has no type field")]
    MissingType,

    /// Frame is larger than the receive ceiling
    #[error("Frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// Errors from the persisted configuration record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Record was never written, or written by something else
    #[error("Unrecognized magic: 0x{found:08x}")]
    MagicMismatch { found: u32 },

    /// Magic matched but the record bytes are corrupt
    #[error("Invalid checksum: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Record is shorter than the fixed layout
    #[error("Record truncated: {size} bytes, need {expected}")]
    TruncatedRecord { size: usize, expected: usize },

    /// Backend I/O failure (file-backed stores)
    #[error("Storage I/O failed: {reason}")]
    Io { reason: String },
}

/// Errors from the framed transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Operation requires an open connection
    #[error("Not connected")]
    NotConnected,

    /// Connect attempt failed
    #[error("Connect failed: {reason}")]
    ConnectFailed { reason: String },

    /// Send attempt failed
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
}

/// Errors from the device link session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Reconnect attempt budget is spent
    #[error("Reconnect attempts exhausted after {attempts}")]
    RetriesExhausted { attempts: u32 },
}
