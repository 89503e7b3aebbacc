//! Framed message, independent of transport shape.
//!
//! The reliability engine and the transform pipeline operate on [`Message`]; the
//! framing layer converts it to and from stream frames or datagrams. The payload is a
//! shared [`Bytes`] buffer so retransmission keeps a copy without reallocating.

use crate::core::header::{FrameFlags, StreamHeader};
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sequence: u64,
    message_id: u16,
    flags: FrameFlags,
    peer_id: u32,
    payload: Bytes,
}

impl Message {
    pub fn new(message_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence: 0,
            message_id,
            flags: FrameFlags::empty(),
            peer_id: 0,
            payload: payload.into(),
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

    pub fn with_peer(mut self, peer_id: u32) -> Self {
        self.peer_id = peer_id;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// 0 for unreliable messages
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Sender's peer id (datagram transports only; 0 on streams)
    pub fn peer_id(&self) -> u32 {
        self.peer_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_reliable(&self) -> bool {
        self.sequence != 0
    }

    pub fn stream_header(&self) -> StreamHeader {
        StreamHeader::new(self.message_id)
            .with_sequence(self.sequence)
            .with_flags(self.flags)
            .with_payload_len(self.payload.len() as u32)
    }
}
