//! # Error Types
//!
//! Error handling for the transport core.
//!
//! This module defines every error variant the core can surface, from malformed
//! frame headers up to handshake aborts.
//!
//! ## Error Categories
//! - **Framing**: malformed headers (`FrameInvalid`). An incomplete header is not an
//!   error; the parser reports it as [`ParseOutcome::NeedMore`](crate::core::header::ParseOutcome).
//! - **Fragmentation**: overflow, duplicates and set mismatches. The fragment is
//!   dropped, the connection survives.
//! - **Payload**: missing key, decryption and decompression failures. The message is
//!   dropped and the error is reported to the application.
//! - **Reliability**: `RetryLimitExceeded` is terminal for the connection.
//! - **Handshake**: invalid peer public values and degenerate shared secrets abort the
//!   handshake before the connection becomes active.
//!
//! Use [`ProtocolError::severity`] to decide whether the owning connection must be torn
//! down.
//!
//! ## Example Usage
//! ```rust
//! use reliable_protocol::error::{ProtocolError, Severity};
//!
//! let err = ProtocolError::FragmentDuplicate;
//! assert_eq!(err.severity(), Severity::Recoverable);
//! assert_eq!(ProtocolError::RetryLimitExceeded(3).severity(), Severity::Fatal);
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_ZERO_MESSAGE_ID: &str = "message id must be non-zero";
    pub const ERR_PAYLOAD_TOO_LARGE: &str = "declared payload length exceeds maximum";
    pub const ERR_PAYLOAD_LENGTH_MISMATCH: &str = "declared payload length does not match datagram";
    pub const ERR_UNKNOWN_FLAGS: &str = "unknown flag bits set";
    pub const ERR_FRAGMENT_TOTAL_ZERO: &str = "fragment total count is zero";
    pub const ERR_FRAGMENT_INDEX: &str = "fragment index not below total count";
    pub const ERR_FRAGMENT_LENGTH: &str = "fragment length does not match datagram";
    pub const ERR_MISSING_SEQUENCE: &str = "datagram too short for sequence number";
    pub const ERR_STREAM_FRAGMENTED: &str = "fragmented flag set on a stream frame";
    pub const ERR_TRUNCATED_DATAGRAM: &str = "datagram shorter than its headers";

    /// Dispatcher errors
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Registry errors
    pub const ERR_RESERVED_MESSAGE_ID: &str = "message id is reserved for control messages";
    pub const ERR_DUPLICATE_MESSAGE_ID: &str = "message id already registered";
    pub const ERR_UNKNOWN_MESSAGE_ID: &str = "message id not registered";

    /// Handshake errors
    pub const ERR_KEY_SIZE_MISMATCH: &str = "peer public value has wrong length for key size";
    pub const ERR_UNSUPPORTED_KEY_SIZE: &str = "unsupported key size";
    pub const ERR_HANDSHAKE_REJECTED: &str = "responder rejected handshake";
    pub const ERR_SESSION_MISMATCH: &str = "handshake response for a different session";
    pub const ERR_RANDOM_SOURCE: &str = "operating system random source failed";
    pub const ERR_KEY_DERIVATION: &str = "key derivation failed";

    /// Connection state errors
    pub const ERR_NOT_ACTIVE: &str = "connection is not active";
    pub const ERR_ALREADY_CLOSED: &str = "connection already closed";
    pub const ERR_WORKER_GONE: &str = "connection worker has shut down";
}

/// Whether an error leaves the owning connection usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Drop the offending message or fragment and keep going.
    Recoverable,
    /// Tear down (and optionally re-establish) the connection.
    Fatal,
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Invalid frame: {0}")]
    FrameInvalid(&'static str),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Fragment index out of range")]
    FragmentOutOfRange,

    #[error("Fragment set exceeds maximum reassembled size")]
    FragmentOverflow,

    #[error("Duplicate fragment")]
    FragmentDuplicate,

    #[error("Fragment disagrees with stored fragment set")]
    FragmentSetMismatch,

    #[error("Maximum unit size {0} cannot carry fragment headers plus one byte")]
    UnitTooSmall(usize),

    #[error("Payload is encrypted but no session key is installed")]
    MissingKey,

    #[error("Unencrypted payload on an encrypted session")]
    UnencryptedPayload,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("Retry limit exceeded for sequence {0}")]
    RetryLimitExceeded(u64),

    #[error("Invalid peer public key")]
    InvalidPeerPublicKey,

    #[error("Weak shared secret")]
    WeakSharedSecret,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unexpected message type: {0}")]
    UnexpectedMessage(u16),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Classify the error for the owning connection layer.
    pub fn severity(&self) -> Severity {
        match self {
            ProtocolError::FragmentOutOfRange
            | ProtocolError::FragmentOverflow
            | ProtocolError::FragmentDuplicate
            | ProtocolError::FragmentSetMismatch
            | ProtocolError::MissingKey
            | ProtocolError::UnencryptedPayload
            | ProtocolError::DecryptionFailure
            | ProtocolError::DecompressionFailure
            | ProtocolError::CorruptPayload(_)
            | ProtocolError::DeserializeError(_)
            | ProtocolError::UnexpectedMessage(_) => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    /// True for errors that must end the connection.
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
