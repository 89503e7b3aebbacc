//! Property-based tests using proptest
//!
//! These tests validate wire-format and engine invariants across randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use reliable_protocol::config::{FragmentationConfig, MAX_PAYLOAD_SIZE};
use reliable_protocol::core::header::{
    DatagramHeader, FragmentHeader, FrameFlags, ParseOutcome, StreamHeader,
};
use reliable_protocol::core::serialization::ObjectCodec;
use reliable_protocol::protocol::fragment::{split, Fragments, Reassembler, FRAGMENT_OVERHEAD};
use reliable_protocol::protocol::pipeline::{decode, serialize_and_transform, TransformPolicy};
use reliable_protocol::utils::compression::{compress, decompress, CompressionKind};
use reliable_protocol::utils::crypto::SessionKey;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

fn flags() -> impl Strategy<Value = FrameFlags> {
    (0u8..8).prop_map(FrameFlags::from_bits_truncate)
}

// Property: any valid stream header survives pack/parse
proptest! {
    #[test]
    fn prop_stream_header_roundtrip(
        sequence in any::<u64>(),
        message_id in 1u16..,
        flags in flags(),
        payload_len in 0u32..=(MAX_PAYLOAD_SIZE as u32),
    ) {
        let flags = flags - FrameFlags::FRAGMENTED;
        let header = StreamHeader::new(message_id)
            .with_sequence(sequence)
            .with_flags(flags)
            .with_payload_len(payload_len);

        prop_assert_eq!(StreamHeader::parse(&header.to_bytes()), ParseOutcome::Complete(header));
    }
}

proptest! {
    #[test]
    fn prop_datagram_header_roundtrip(
        peer_id in any::<u32>(),
        message_id in 1u16..,
        flags in flags(),
        payload_len in 0u32..=(MAX_PAYLOAD_SIZE as u32),
    ) {
        let header = DatagramHeader::new(peer_id, message_id)
            .with_flags(flags)
            .with_payload_len(payload_len);

        prop_assert_eq!(DatagramHeader::parse(&header.to_bytes()), ParseOutcome::Complete(header));
    }
}

proptest! {
    #[test]
    fn prop_fragment_header_roundtrip(
        set_id in any::<u32>(),
        (index, total) in (1u16..).prop_flat_map(|total| (0..total, Just(total))),
        fragment_len in any::<u16>(),
    ) {
        let header = FragmentHeader::new(set_id, index, total, fragment_len);
        prop_assert_eq!(FragmentHeader::parse(&header.to_bytes()), ParseOutcome::Complete(header));
    }
}

// Property: every strict prefix of a header asks for exactly the missing bytes
proptest! {
    #[test]
    fn prop_short_stream_header_needs_more(cut in 0usize..StreamHeader::SIZE) {
        let bytes = StreamHeader::new(9).with_payload_len(4).to_bytes();
        prop_assert_eq!(
            StreamHeader::parse(&bytes[..cut]),
            ParseOutcome::NeedMore { needed: StreamHeader::SIZE - cut }
        );
    }
}

// Property: header parsing never panics on arbitrary bytes
proptest! {
    #[test]
    fn prop_header_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = StreamHeader::parse(&data);
        let _ = DatagramHeader::parse(&data);
        let _ = FragmentHeader::parse(&data);
    }
}

// Property: split then reassemble in any order returns the payload, and only on
// the last fragment
proptest! {
    #[test]
    fn prop_fragmentation_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 1..20_000),
        unit in (FRAGMENT_OVERHEAD + 1)..2000usize,
        seed in any::<u64>(),
    ) {
        let payload = Bytes::from(payload);
        let parts = match split(payload.clone(), unit, 7).unwrap() {
            Fragments::Single(single) => {
                prop_assert_eq!(single, payload);
                return Ok(());
            }
            Fragments::Parts(parts) => parts,
        };
        prop_assert!(parts.iter().all(|p| p.data.len() + FRAGMENT_OVERHEAD <= unit));

        // deterministic shuffle
        let mut order: Vec<usize> = (0..parts.len()).collect();
        let mut state = seed | 1;
        for i in (1..order.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            order.swap(i, (state % (i as u64 + 1)) as usize);
        }

        let config = FragmentationConfig {
            max_reassembled_size: 64 * 1024,
            ..FragmentationConfig::default()
        };
        let mut reassembler = Reassembler::new(&config);
        let now = Instant::now();
        for (n, &i) in order.iter().enumerate() {
            let part = &parts[i];
            let result = reassembler.accept(3, &part.header, &part.data, now).unwrap();
            if n + 1 < order.len() {
                prop_assert!(result.is_none());
            } else {
                prop_assert_eq!(result.unwrap(), payload.to_vec());
            }
        }
        prop_assert_eq!(reassembler.pending_sets(), 0);
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
struct Record {
    id: u64,
    delta: i32,
    name: String,
    tag: Option<u8>,
    samples: Vec<i16>,
    attrs: BTreeMap<String, u32>,
}

fn record() -> impl Strategy<Value = Record> {
    (
        any::<u64>(),
        any::<i32>(),
        ".{0,40}",
        any::<Option<u8>>(),
        prop::collection::vec(any::<i16>(), 0..200),
        prop::collection::btree_map("[a-z]{1,8}", any::<u32>(), 0..8),
    )
        .prop_map(|(id, delta, name, tag, samples, attrs)| Record {
            id,
            delta,
            name,
            tag,
            samples,
            attrs,
        })
}

// Property: decode(serialize_and_transform(R)) == R for every policy
proptest! {
    #[test]
    fn prop_pipeline_roundtrip(
        rec in record(),
        compression in any::<bool>(),
        encryption in any::<bool>(),
        zstd in any::<bool>(),
    ) {
        let codec = ObjectCodec::default();
        let key = SessionKey::from_bytes([0x5a; 32]);
        let policy = TransformPolicy {
            compression,
            encryption,
            compression_kind: if zstd { CompressionKind::Zstd } else { CompressionKind::Lz4 },
            compression_threshold_bytes: 32,
            ..TransformPolicy::default()
        };

        let (flags, bytes) = serialize_and_transform(&codec, &rec, &policy, Some(&key)).unwrap();
        prop_assert_eq!(flags.contains(FrameFlags::ENCRYPTED), encryption);
        let back: Record = decode(&codec, flags, &bytes, &policy, Some(&key)).unwrap();
        prop_assert_eq!(back, rec);
    }
}

proptest! {
    #[test]
    fn prop_compression_roundtrip(data in prop::collection::vec(any::<u8>(), 0..50_000)) {
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let compressed = compress(&data, &kind).expect("Compression should not fail");
            let decompressed = decompress(&compressed, &kind).expect("Decompression should not fail");
            prop_assert_eq!(&decompressed, &data);
        }
    }
}

// Property: decompressing random bytes returns an error or data, never panics
proptest! {
    #[test]
    fn prop_decompression_invalid_data_returns_error(data in prop::collection::vec(any::<u8>(), 0..1000)) {
        let _ = decompress(&data, &CompressionKind::Lz4);
        let _ = decompress(&data, &CompressionKind::Zstd);
    }
}
