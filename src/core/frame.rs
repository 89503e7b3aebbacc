//! # Framing
//!
//! Turns byte streams and datagrams into [`Message`]s and back.
//!
//! - [`StreamFrameCodec`] is a tokio-util codec for ordered byte streams.
//! - [`StreamFramer`] wraps the codec with its own receive buffer for callers that
//!   push bytes in arbitrary chunks and want every complete frame back.
//! - [`DatagramFrame`] is the layout of one datagram, fragmented or not.

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::header::{DatagramHeader, FragmentHeader, FrameFlags, ParseOutcome, StreamHeader};
use crate::core::message::Message;
use crate::error::constants::{
    ERR_FRAGMENT_LENGTH, ERR_MISSING_SEQUENCE, ERR_PAYLOAD_LENGTH_MISMATCH, ERR_TRUNCATED_DATAGRAM,
};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Upper bound on buffer growth per decode call while a payload is incomplete
const MAX_RESERVE: usize = 64 * 1024;

/// Length-delimited codec for the stream header format
#[derive(Debug, Clone, Copy)]
pub struct StreamFrameCodec {
    max_payload_size: usize,
}

impl StreamFrameCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for StreamFrameCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl Decoder for StreamFrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let header = match StreamHeader::parse_with_limit(src, self.max_payload_size) {
            ParseOutcome::Complete(header) => header,
            ParseOutcome::NeedMore { needed } => {
                src.reserve(needed);
                return Ok(None);
            }
            ParseOutcome::Invalid(reason) => {
                warn!(reason, "rejecting stream frame");
                return Err(ProtocolError::FrameInvalid(reason));
            }
        };

        let frame_len = header.frame_len();
        if src.len() < frame_len {
            // Wait for the rest of the payload; a declared length alone reserves
            // at most MAX_RESERVE
            src.reserve((frame_len - src.len()).min(MAX_RESERVE));
            return Ok(None);
        }

        src.advance(StreamHeader::SIZE);
        let payload = src.split_to(header.payload_len()).freeze();

        Ok(Some(
            Message::new(header.message_id(), payload)
                .with_sequence(header.sequence())
                .with_flags(header.flags()),
        ))
    }
}

impl Encoder<Message> for StreamFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_payload_size {
            return Err(ProtocolError::OversizedPacket(item.len()));
        }

        let header = item.stream_header();
        dst.reserve(header.frame_len());
        header.pack(dst);
        dst.extend_from_slice(item.payload());
        Ok(())
    }
}

/// Push-style stream reassembly: feed arbitrary chunks, get whole messages.
#[derive(Debug, Default)]
pub struct StreamFramer {
    codec: StreamFrameCodec,
    buffer: BytesMut,
}

impl StreamFramer {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            codec: StreamFrameCodec::new(max_payload_size),
            buffer: BytesMut::new(),
        }
    }

    /// Append `data` and return every frame now complete, in arrival order.
    ///
    /// A malformed header poisons the stream: the buffer is discarded and the error
    /// returned, since frame boundaries can no longer be trusted.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(message)) => frames.push(message),
                Ok(None) => break,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }
        Ok(frames)
    }

    /// Bytes held while waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// One datagram: header, sequence number, optional fragment header, chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramFrame {
    header: DatagramHeader,
    sequence: u64,
    fragment: Option<FragmentHeader>,
    chunk: Bytes,
}

impl DatagramFrame {
    /// Build a frame; the declared length and `FRAGMENTED` flag follow from the
    /// arguments.
    pub fn new(
        peer_id: u32,
        message_id: u16,
        flags: FrameFlags,
        sequence: u64,
        fragment: Option<FragmentHeader>,
        chunk: Bytes,
    ) -> Self {
        let mut flags = flags - FrameFlags::FRAGMENTED;
        let mut body_len = 8 + chunk.len();
        if fragment.is_some() {
            flags |= FrameFlags::FRAGMENTED;
            body_len += FragmentHeader::SIZE;
        }

        Self {
            header: DatagramHeader::new(peer_id, message_id)
                .with_flags(flags)
                .with_payload_len(body_len as u32),
            sequence,
            fragment,
            chunk,
        }
    }

    pub fn header(&self) -> &DatagramHeader {
        &self.header
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn fragment(&self) -> Option<&FragmentHeader> {
        self.fragment.as_ref()
    }

    pub fn chunk(&self) -> &Bytes {
        &self.chunk
    }

    pub fn encoded_len(&self) -> usize {
        DatagramHeader::SIZE + self.header.payload_len()
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        self.header.pack(buf);
        buf.put_u64(self.sequence);
        if let Some(fragment) = &self.fragment {
            fragment.pack(buf);
        }
        buf.put_slice(&self.chunk);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse one complete datagram. Datagrams arrive whole, so a short buffer is
    /// invalid rather than incomplete.
    pub fn parse(bytes: &[u8], max_payload: usize) -> Result<Self> {
        let header = match DatagramHeader::parse_with_limit(bytes, max_payload) {
            ParseOutcome::Complete(header) => header,
            ParseOutcome::NeedMore { .. } => {
                return Err(ProtocolError::FrameInvalid(ERR_TRUNCATED_DATAGRAM))
            }
            ParseOutcome::Invalid(reason) => return Err(ProtocolError::FrameInvalid(reason)),
        };

        let mut body = &bytes[DatagramHeader::SIZE..];
        if body.len() != header.payload_len() {
            debug!(
                declared = header.payload_len(),
                actual = body.len(),
                "datagram length mismatch"
            );
            return Err(ProtocolError::FrameInvalid(ERR_PAYLOAD_LENGTH_MISMATCH));
        }
        if body.len() < 8 {
            return Err(ProtocolError::FrameInvalid(ERR_MISSING_SEQUENCE));
        }
        let sequence = body.get_u64();

        let fragment = if header.is_fragmented() {
            let fragment = match FragmentHeader::parse(body) {
                ParseOutcome::Complete(fragment) => fragment,
                ParseOutcome::NeedMore { .. } => {
                    return Err(ProtocolError::FrameInvalid(ERR_TRUNCATED_DATAGRAM))
                }
                ParseOutcome::Invalid(reason) => return Err(ProtocolError::FrameInvalid(reason)),
            };
            body.advance(FragmentHeader::SIZE);
            if fragment.fragment_len() != body.len() {
                return Err(ProtocolError::FrameInvalid(ERR_FRAGMENT_LENGTH));
            }
            Some(fragment)
        } else {
            None
        };

        Ok(Self {
            header,
            sequence,
            fragment,
            chunk: Bytes::copy_from_slice(body),
        })
    }

    /// The whole message carried by an unfragmented datagram
    pub fn into_message(self) -> Message {
        Message::new(self.header.message_id(), self.chunk)
            .with_sequence(self.sequence)
            .with_flags(self.header.flags())
            .with_peer(self.header.peer_id())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn message(id: u16, seq: u64, payload: &'static [u8]) -> Message {
        Message::new(id, Bytes::from_static(payload)).with_sequence(seq)
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = StreamFrameCodec::default();
        let mut buf = BytesMut::new();
        let original = message(17, 3, b"payload");

        codec.encode(original.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), StreamHeader::SIZE + 7);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_large_declared_length_reserves_bounded_chunk() {
        let mut codec = StreamFrameCodec::default();
        let header = StreamHeader::new(17).with_payload_len(8 * 1024 * 1024);
        let mut buf = BytesMut::from(&header.to_bytes()[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() <= 4 * MAX_RESERVE, "capacity {}", buf.capacity());

        // still completes once the bytes arrive
        buf.extend_from_slice(&vec![0u8; 8 * 1024 * 1024]);
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(message.len(), 8 * 1024 * 1024);
    }

    #[test]
    fn test_codec_waits_for_payload() {
        let mut codec = StreamFrameCodec::default();
        let mut full = BytesMut::new();
        codec.encode(message(17, 1, b"abcdef"), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..StreamHeader::SIZE + 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        // nothing consumed while waiting
        assert_eq!(partial.len(), StreamHeader::SIZE + 2);
    }

    #[test]
    fn test_encoder_rejects_oversized() {
        let mut codec = StreamFrameCodec::new(4);
        let mut buf = BytesMut::new();
        let err = codec.encode(message(17, 0, b"too long"), &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedPacket(8)));
    }

    #[test]
    fn test_framer_splits_and_joins_chunks() {
        let mut codec = StreamFrameCodec::default();
        let mut wire = BytesMut::new();
        codec.encode(message(20, 1, b"first"), &mut wire).unwrap();
        codec.encode(message(21, 2, b"second"), &mut wire).unwrap();
        codec.encode(message(22, 0, b""), &mut wire).unwrap();

        let mut framer = StreamFramer::default();
        let mut out = Vec::new();
        for chunk in wire.chunks(4) {
            out.extend(framer.feed(chunk).unwrap());
        }

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].payload().as_ref(), b"first");
        assert_eq!(out[1].sequence(), 2);
        assert!(out[2].is_empty());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_framer_discards_after_invalid_header() {
        let mut framer = StreamFramer::default();
        let bad = StreamHeader::new(0).to_bytes();
        assert!(framer.feed(&bad).is_err());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_datagram_roundtrip_unfragmented() {
        let frame = DatagramFrame::new(7, 30, FrameFlags::ENCRYPTED, 9, None, Bytes::from_static(b"hi"));
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), DatagramHeader::SIZE + 8 + 2);

        let parsed = DatagramFrame::parse(&bytes, MAX_PAYLOAD_SIZE).unwrap();
        assert_eq!(parsed, frame);
        let message = parsed.into_message();
        assert_eq!(message.peer_id(), 7);
        assert_eq!(message.sequence(), 9);
        assert_eq!(message.flags(), FrameFlags::ENCRYPTED);
    }

    #[test]
    fn test_datagram_fragment_sets_flag() {
        let fragment = FragmentHeader::new(11, 1, 3, 4);
        let frame = DatagramFrame::new(7, 30, FrameFlags::empty(), 9, Some(fragment), Bytes::from_static(b"abcd"));
        assert!(frame.header().is_fragmented());

        let parsed = DatagramFrame::parse(&frame.to_bytes(), MAX_PAYLOAD_SIZE).unwrap();
        assert_eq!(parsed.fragment(), Some(&fragment));
        assert_eq!(parsed.chunk().as_ref(), b"abcd");
    }

    #[test]
    fn test_datagram_length_mismatch() {
        let frame = DatagramFrame::new(1, 30, FrameFlags::empty(), 1, None, Bytes::from_static(b"abc"));
        let mut bytes = frame.to_bytes().to_vec();
        bytes.push(0);
        assert!(matches!(
            DatagramFrame::parse(&bytes, MAX_PAYLOAD_SIZE),
            Err(ProtocolError::FrameInvalid(ERR_PAYLOAD_LENGTH_MISMATCH))
        ));
    }

    #[test]
    fn test_truncated_datagram_invalid() {
        assert!(matches!(
            DatagramFrame::parse(&[0x00, 0x01], MAX_PAYLOAD_SIZE),
            Err(ProtocolError::FrameInvalid(ERR_TRUNCATED_DATAGRAM))
        ));
    }
}
