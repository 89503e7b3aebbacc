//! # Core Protocol Components
//!
//! Fixed-size frame headers, stream framing and the binary object codec.
//!
//! ## Components
//! - **Header**: stream, datagram and fragment headers with a three-way parse result
//! - **Frame**: tokio codec for byte streams plus the datagram layout
//! - **Message**: a header-agnostic view of one framed message
//! - **Serialization**: compact varint record codec (bincode) and JSON for debugging
//!
//! ## Wire Format
//! All integers are big-endian.
//! ```text
//! stream:   [Seq(8)] [MsgId(2)] [Flags(1)] [Len(4)] [Payload(Len)]
//! datagram: [Flags(1)] [PeerId(4)] [MsgId(2)] [Len(4)] [Seq(8)] [FragHdr(10)?] [Chunk]
//! fragment: [SetId(4)] [Index(2)] [Total(2)] [ChunkLen(2)]
//! ```
//!
//! ## Security
//! - Declared lengths are checked against a maximum before any allocation
//! - Unknown flag bits and a zero message id are rejected

pub mod frame;
pub mod header;
pub mod message;
pub mod serialization;
