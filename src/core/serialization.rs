//! # Object Codec
//!
//! Encodes application records to bytes and back. The default format is a compact
//! binary encoding (bincode with variable-length integers):
//!
//! - unsigned integers use a short varint form; signed integers are zig-zag mapped
//!   first, so small negative numbers stay small
//! - strings and byte sequences are length-prefixed
//! - optional fields carry a one-byte presence tag
//! - struct fields are written in declaration order with no field names
//!
//! Decoding is bounded: a declared length that exceeds the configured limit fails
//! before allocation, and trailing bytes after the record are rejected.
//!
//! JSON is available for debugging and interop with tooling.
//!
//! ## Usage
//! ```rust
//! use reliable_protocol::core::serialization::ObjectCodec;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Move { x: i32, y: i32, label: Option<String> }
//!
//! let codec = ObjectCodec::default();
//! let bytes = codec.encode(&Move { x: -1, y: 300, label: None }).unwrap();
//! let back: Move = codec.decode(&bytes).unwrap();
//! assert_eq!(back, Move { x: -1, y: 300, label: None });
//! ```

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{ProtocolError, Result};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Supported record encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Varint binary (default)
    #[default]
    Compact,
    /// Human-readable JSON
    Json,
}

impl SerializationFormat {
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Compact => "Compact",
            SerializationFormat::Json => "JSON",
        }
    }
}

fn compact_options(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_varint_encoding()
        .with_big_endian()
        .with_limit(limit)
        .reject_trailing_bytes()
}

/// Record encoder/decoder with a size limit
#[derive(Debug, Clone, Copy)]
pub struct ObjectCodec {
    format: SerializationFormat,
    max_size: usize,
}

impl Default for ObjectCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl ObjectCodec {
    pub fn new(max_size: usize) -> Self {
        Self {
            format: SerializationFormat::Compact,
            max_size,
        }
    }

    pub fn with_format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn encode<R: Serialize + ?Sized>(&self, record: &R) -> Result<Vec<u8>> {
        let bytes = match self.format {
            SerializationFormat::Compact => compact_options(self.max_size as u64)
                .serialize(record)
                .map_err(|e| ProtocolError::SerializeError(e.to_string()))?,
            SerializationFormat::Json => serde_json::to_vec(record)
                .map_err(|e| ProtocolError::SerializeError(e.to_string()))?,
        };

        if bytes.len() > self.max_size {
            return Err(ProtocolError::OversizedPacket(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode<R: DeserializeOwned>(&self, bytes: &[u8]) -> Result<R> {
        if bytes.len() > self.max_size {
            return Err(ProtocolError::OversizedPacket(bytes.len()));
        }

        match self.format {
            SerializationFormat::Compact => compact_options(self.max_size as u64)
                .deserialize(bytes)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
        }
    }

    /// Encoded size without producing the bytes (compact format only; JSON encodes)
    pub fn encoded_size<R: Serialize + ?Sized>(&self, record: &R) -> Result<usize> {
        match self.format {
            SerializationFormat::Compact => compact_options(self.max_size as u64)
                .serialized_size(record)
                .map(|size| size as usize)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
            SerializationFormat::Json => self.encode(record).map(|bytes| bytes.len()),
        }
    }
}
