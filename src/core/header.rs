//! # Frame Headers
//!
//! Fixed-size headers for the two transport shapes plus the fragment sub-header.
//!
//! Parsing never panics and never allocates. A short buffer is not an error: the
//! parser reports [`ParseOutcome::NeedMore`] with the number of missing bytes so a
//! stream reader can wait for them. Structural violations (zero message id, unknown
//! flag bits, oversized declared length, bad fragment indices) are reported as
//! [`ParseOutcome::Invalid`] and are fatal for the connection.
//!
//! Headers are immutable values; the `with_*` builders return modified copies.

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::constants::{
    ERR_FRAGMENT_INDEX, ERR_FRAGMENT_TOTAL_ZERO, ERR_PAYLOAD_TOO_LARGE, ERR_STREAM_FRAGMENTED,
    ERR_UNKNOWN_FLAGS, ERR_ZERO_MESSAGE_ID,
};
use crate::error::{ProtocolError, Result};
use bitflags::bitflags;
use bytes::{Buf, BufMut};

bitflags! {
    /// Transform and framing flags carried in every header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        const ENCRYPTED  = 0b0000_0001;
        const COMPRESSED = 0b0000_0010;
        const FRAGMENTED = 0b0000_0100;
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        FrameFlags::empty()
    }
}

/// Result of parsing a header from a byte prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome<T> {
    /// A full, structurally valid header
    Complete(T),
    /// The buffer is shorter than the header; `needed` more bytes are required
    NeedMore { needed: usize },
    /// The bytes can never form a valid header
    Invalid(&'static str),
}

impl<T> ParseOutcome<T> {
    /// `NeedMore` becomes `Ok(None)`, `Invalid` becomes [`ProtocolError::FrameInvalid`].
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            ParseOutcome::Complete(header) => Ok(Some(header)),
            ParseOutcome::NeedMore { .. } => Ok(None),
            ParseOutcome::Invalid(reason) => Err(ProtocolError::FrameInvalid(reason)),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ParseOutcome::Complete(_))
    }
}

fn parse_flags(raw: u8) -> std::result::Result<FrameFlags, &'static str> {
    FrameFlags::from_bits(raw).ok_or(ERR_UNKNOWN_FLAGS)
}

/// Header of a frame on an ordered byte stream.
///
/// ```text
/// [Seq(8)] [MsgId(2)] [Flags(1)] [Len(4)]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    sequence: u64,
    message_id: u16,
    flags: FrameFlags,
    payload_len: u32,
}

impl StreamHeader {
    pub const SIZE: usize = 15;

    pub fn new(message_id: u16) -> Self {
        Self {
            sequence: 0,
            message_id,
            flags: FrameFlags::empty(),
            payload_len: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload_len(mut self, payload_len: u32) -> Self {
        self.payload_len = payload_len;
        self
    }

    /// Sequence number; 0 marks an unreliable message
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    /// Total frame length (header plus payload)
    pub fn frame_len(&self) -> usize {
        Self::SIZE + self.payload_len()
    }

    pub fn pack(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.sequence);
        buf.put_u16(self.message_id);
        buf.put_u8(self.flags.bits());
        buf.put_u32(self.payload_len);
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        self.pack(&mut &mut out[..]);
        out
    }

    /// Parse with the crate-wide payload cap
    pub fn parse(bytes: &[u8]) -> ParseOutcome<Self> {
        Self::parse_with_limit(bytes, MAX_PAYLOAD_SIZE)
    }

    pub fn parse_with_limit(bytes: &[u8], max_payload: usize) -> ParseOutcome<Self> {
        if bytes.len() < Self::SIZE {
            return ParseOutcome::NeedMore {
                needed: Self::SIZE - bytes.len(),
            };
        }

        let mut buf = &bytes[..Self::SIZE];
        let sequence = buf.get_u64();
        let message_id = buf.get_u16();
        let raw_flags = buf.get_u8();
        let payload_len = buf.get_u32();

        if message_id == 0 {
            return ParseOutcome::Invalid(ERR_ZERO_MESSAGE_ID);
        }
        let flags = match parse_flags(raw_flags) {
            Ok(flags) => flags,
            Err(reason) => return ParseOutcome::Invalid(reason),
        };
        // streams never fragment
        if flags.contains(FrameFlags::FRAGMENTED) {
            return ParseOutcome::Invalid(ERR_STREAM_FRAGMENTED);
        }
        if payload_len as usize > max_payload {
            return ParseOutcome::Invalid(ERR_PAYLOAD_TOO_LARGE);
        }

        ParseOutcome::Complete(Self {
            sequence,
            message_id,
            flags,
            payload_len,
        })
    }
}

/// Header of a single datagram.
///
/// ```text
/// [Flags(1)] [PeerId(4)] [MsgId(2)] [Len(4)]
/// ```
///
/// `Len` counts everything after the header: the 8-byte sequence number, the
/// fragment header when `FRAGMENTED` is set, and the payload chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    flags: FrameFlags,
    peer_id: u32,
    message_id: u16,
    payload_len: u32,
}

impl DatagramHeader {
    pub const SIZE: usize = 11;

    pub fn new(peer_id: u32, message_id: u16) -> Self {
        Self {
            flags: FrameFlags::empty(),
            peer_id,
            message_id,
            payload_len: 0,
        }
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload_len(mut self, payload_len: u32) -> Self {
        self.payload_len = payload_len;
        self
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Sender's peer id
    pub fn peer_id(&self) -> u32 {
        self.peer_id
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    pub fn is_fragmented(&self) -> bool {
        self.flags.contains(FrameFlags::FRAGMENTED)
    }

    pub fn pack(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u32(self.peer_id);
        buf.put_u16(self.message_id);
        buf.put_u32(self.payload_len);
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        self.pack(&mut &mut out[..]);
        out
    }

    pub fn parse(bytes: &[u8]) -> ParseOutcome<Self> {
        Self::parse_with_limit(bytes, MAX_PAYLOAD_SIZE)
    }

    pub fn parse_with_limit(bytes: &[u8], max_payload: usize) -> ParseOutcome<Self> {
        if bytes.len() < Self::SIZE {
            return ParseOutcome::NeedMore {
                needed: Self::SIZE - bytes.len(),
            };
        }

        let mut buf = &bytes[..Self::SIZE];
        let raw_flags = buf.get_u8();
        let peer_id = buf.get_u32();
        let message_id = buf.get_u16();
        let payload_len = buf.get_u32();

        if message_id == 0 {
            return ParseOutcome::Invalid(ERR_ZERO_MESSAGE_ID);
        }
        let flags = match parse_flags(raw_flags) {
            Ok(flags) => flags,
            Err(reason) => return ParseOutcome::Invalid(reason),
        };
        if payload_len as usize > max_payload {
            return ParseOutcome::Invalid(ERR_PAYLOAD_TOO_LARGE);
        }

        ParseOutcome::Complete(Self {
            flags,
            peer_id,
            message_id,
            payload_len,
        })
    }
}

/// Sub-header preceding each fragment chunk.
///
/// ```text
/// [SetId(4)] [Index(2)] [Total(2)] [ChunkLen(2)]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentHeader {
    set_id: u32,
    index: u16,
    total: u16,
    fragment_len: u16,
}

impl FragmentHeader {
    pub const SIZE: usize = 10;

    pub fn new(set_id: u32, index: u16, total: u16, fragment_len: u16) -> Self {
        Self {
            set_id,
            index,
            total,
            fragment_len,
        }
    }

    pub fn set_id(&self) -> u32 {
        self.set_id
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    pub fn fragment_len(&self) -> usize {
        self.fragment_len as usize
    }

    pub fn pack(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.set_id);
        buf.put_u16(self.index);
        buf.put_u16(self.total);
        buf.put_u16(self.fragment_len);
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        self.pack(&mut &mut out[..]);
        out
    }

    pub fn parse(bytes: &[u8]) -> ParseOutcome<Self> {
        if bytes.len() < Self::SIZE {
            return ParseOutcome::NeedMore {
                needed: Self::SIZE - bytes.len(),
            };
        }

        let mut buf = &bytes[..Self::SIZE];
        let set_id = buf.get_u32();
        let index = buf.get_u16();
        let total = buf.get_u16();
        let fragment_len = buf.get_u16();

        if total == 0 {
            return ParseOutcome::Invalid(ERR_FRAGMENT_TOTAL_ZERO);
        }
        if index >= total {
            return ParseOutcome::Invalid(ERR_FRAGMENT_INDEX);
        }

        ParseOutcome::Complete(Self {
            set_id,
            index,
            total,
            fragment_len,
        })
    }
}
