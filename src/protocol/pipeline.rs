//! # Payload Transform Pipeline
//!
//! Outbound: serialize → compress (optional) → encrypt (optional).
//! Inbound: decrypt (if `ENCRYPTED`) → decompress (if `COMPRESSED`) → deserialize.
//!
//! The inbound direction is driven by the header flags alone, so a receiver decodes
//! whatever combination the sender chose. The compression algorithm is not on the
//! wire; both ends use the configured [`CompressionKind`].
//!
//! Compression is skipped for payloads under the threshold and whenever it would not
//! shrink the payload below `ratio × original`. Encryption uses XChaCha20-Poly1305
//! with a fresh 24-byte nonce prepended to the ciphertext.

use crate::config::TransformConfig;
use crate::core::header::FrameFlags;
use crate::core::serialization::ObjectCodec;
use crate::error::{ProtocolError, Result};
use crate::utils::compression::{decompress_bounded, maybe_compress, CompressionKind};
use crate::utils::crypto::{Crypto, SessionKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

/// Which transforms to apply on send
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPolicy {
    pub compression: bool,
    pub encryption: bool,
    pub compression_kind: CompressionKind,
    pub compression_threshold_bytes: usize,
    pub compression_ratio: f64,
    /// Cap on decompressed output
    pub max_payload_size: usize,
}

impl TransformPolicy {
    /// No compression, no encryption
    pub fn plain(max_payload_size: usize) -> Self {
        Self {
            compression: false,
            encryption: false,
            compression_kind: CompressionKind::Lz4,
            compression_threshold_bytes: 0,
            compression_ratio: 1.0,
            max_payload_size,
        }
    }
}

impl From<&TransformConfig> for TransformPolicy {
    fn from(config: &TransformConfig) -> Self {
        Self {
            compression: config.compression_enabled,
            encryption: config.encryption_enabled,
            compression_kind: config.compression_kind,
            compression_threshold_bytes: config.compression_threshold_bytes,
            compression_ratio: config.compression_ratio,
            max_payload_size: config.max_payload_size,
        }
    }
}

impl Default for TransformPolicy {
    fn default() -> Self {
        Self::from(&TransformConfig::default())
    }
}

/// Apply the outbound transforms to an already serialized payload
pub fn transform_bytes(
    payload: Vec<u8>,
    policy: &TransformPolicy,
    key: Option<&SessionKey>,
) -> Result<(FrameFlags, Vec<u8>)> {
    let mut flags = FrameFlags::empty();
    let mut bytes = payload;

    if policy.compression {
        let (out, compressed) = maybe_compress(
            &bytes,
            &policy.compression_kind,
            policy.compression_threshold_bytes,
            policy.compression_ratio,
        )?;
        if compressed {
            trace!(before = bytes.len(), after = out.len(), "compressed payload");
            flags |= FrameFlags::COMPRESSED;
            bytes = out;
        }
    }

    if policy.encryption {
        let key = key.ok_or(ProtocolError::MissingKey)?;
        bytes = Crypto::new(key).seal(&bytes)?;
        flags |= FrameFlags::ENCRYPTED;
    }

    Ok((flags, bytes))
}

/// Serialize `record` and apply the outbound transforms
pub fn serialize_and_transform<R: Serialize + ?Sized>(
    codec: &ObjectCodec,
    record: &R,
    policy: &TransformPolicy,
    key: Option<&SessionKey>,
) -> Result<(FrameFlags, Vec<u8>)> {
    let payload = codec.encode(record)?;
    transform_bytes(payload, policy, key)
}

/// Undo the transforms named by `flags`
pub fn reverse_bytes(
    flags: FrameFlags,
    bytes: &[u8],
    policy: &TransformPolicy,
    key: Option<&SessionKey>,
) -> Result<Vec<u8>> {
    let decrypted;
    let mut current = bytes;

    if flags.contains(FrameFlags::ENCRYPTED) {
        let key = key.ok_or(ProtocolError::MissingKey)?;
        decrypted = Crypto::new(key).open(current)?;
        current = decrypted.as_slice();
    }

    if flags.contains(FrameFlags::COMPRESSED) {
        return decompress_bounded(current, &policy.compression_kind, policy.max_payload_size);
    }

    Ok(current.to_vec())
}

/// Reverse the transforms and deserialize.
///
/// Once decryption has succeeded, a payload that fails to decompress or to
/// deserialize is reported as [`ProtocolError::CorruptPayload`].
pub fn decode<R: DeserializeOwned>(
    codec: &ObjectCodec,
    flags: FrameFlags,
    bytes: &[u8],
    policy: &TransformPolicy,
    key: Option<&SessionKey>,
) -> Result<R> {
    let plain = reverse_bytes(flags, bytes, policy, key).map_err(|e| match e {
        ProtocolError::DecompressionFailure => {
            ProtocolError::CorruptPayload("payload does not decompress".to_string())
        }
        other => other,
    })?;
    codec.decode(&plain).map_err(|e| match e {
        ProtocolError::DeserializeError(reason) => ProtocolError::CorruptPayload(reason),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Snapshot {
        tick: u64,
        entities: Vec<(u32, i32, i32)>,
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            tick: 42,
            entities: (0..200).map(|i| (i % 4, 5, -5)).collect(),
        }
    }

    fn key() -> SessionKey {
        SessionKey::from_bytes([9u8; 32])
    }

    fn policy(compression: bool, encryption: bool) -> TransformPolicy {
        TransformPolicy {
            compression,
            encryption,
            compression_threshold_bytes: 64,
            ..TransformPolicy::default()
        }
    }

    #[test]
    fn test_all_flag_combinations_roundtrip() {
        let codec = ObjectCodec::default();
        for (compression, encryption) in [(false, false), (true, false), (false, true), (true, true)] {
            let policy = policy(compression, encryption);
            let (flags, bytes) =
                serialize_and_transform(&codec, &snapshot(), &policy, Some(&key())).unwrap();
            assert_eq!(flags.contains(FrameFlags::ENCRYPTED), encryption);
            assert_eq!(flags.contains(FrameFlags::COMPRESSED), compression);

            let back: Snapshot = decode(&codec, flags, &bytes, &policy, Some(&key())).unwrap();
            assert_eq!(back, snapshot());
        }
    }

    #[test]
    fn test_small_payload_not_compressed() {
        let codec = ObjectCodec::default();
        let (flags, _) =
            serialize_and_transform(&codec, &1u8, &policy(true, false), None).unwrap();
        assert!(!flags.contains(FrameFlags::COMPRESSED));
    }

    #[test]
    fn test_encryption_without_key() {
        let codec = ObjectCodec::default();
        assert!(matches!(
            serialize_and_transform(&codec, &snapshot(), &policy(false, true), None),
            Err(ProtocolError::MissingKey)
        ));
        assert!(matches!(
            reverse_bytes(FrameFlags::ENCRYPTED, &[0u8; 64], &policy(false, false), None),
            Err(ProtocolError::MissingKey)
        ));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let codec = ObjectCodec::default();
        let policy = policy(false, true);
        let (flags, mut bytes) =
            serialize_and_transform(&codec, &snapshot(), &policy, Some(&key())).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            decode::<Snapshot>(&codec, flags, &bytes, &policy, Some(&key())),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_wrong_record_type_is_corrupt() {
        let codec = ObjectCodec::default();
        let policy = policy(false, false);
        let (flags, bytes) = serialize_and_transform(&codec, &7u8, &policy, None).unwrap();
        assert!(matches!(
            decode::<Snapshot>(&codec, flags, &bytes, &policy, None),
            Err(ProtocolError::CorruptPayload(_))
        ));
    }

    #[test]
    fn test_bad_compressed_bytes() {
        assert!(matches!(
            reverse_bytes(FrameFlags::COMPRESSED, &[1, 2], &policy(true, false), None),
            Err(ProtocolError::DecompressionFailure)
        ));
        assert!(matches!(
            decode::<Snapshot>(
                &ObjectCodec::default(),
                FrameFlags::COMPRESSED,
                &[1, 2],
                &policy(true, false),
                None
            ),
            Err(ProtocolError::CorruptPayload(_))
        ));
    }
}
