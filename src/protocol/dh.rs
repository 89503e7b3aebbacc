//! # Finite-Field Diffie-Hellman
//!
//! Ephemeral key agreement over safe-prime groups (`p = 2q + 1`, generator 2 of the
//! order-`q` subgroup), followed by HKDF-SHA256 to produce the session key.
//!
//! ## Groups
//! - 2048-bit: the RFC 3526 MODP group 14 prime
//! - 512-bit: `p = 2^512 - 235937`; for testing and constrained links only
//!
//! ## Validation
//! A peer public value `y` is accepted only if `1 < y < p - 1` and `y^q ≡ 1 (mod p)`,
//! which confines it to the prime-order subgroup. A shared secret equal to 0 or 1 is
//! rejected.
//!
//! ## Key derivation
//! ```text
//! z    = y^x mod p, left-padded to the modulus length
//! salt = SHA-256(lower public value || higher public value)
//! key  = HKDF-SHA256(ikm = z, salt, info = "reliable-protocol/v1 session key")[..32]
//! ```
//! Public values are compared as fixed-length big-endian byte strings, so both sides
//! build the same salt regardless of role.
//!
//! ## Security
//! - The private exponent is drawn from the OS RNG and held in zeroizing storage
//! - The shared secret and HKDF intermediates are wiped after use
//! - Each session is consumed by [`KeyExchangeSession::derive_shared_key`]

use crate::error::constants::{ERR_KEY_DERIVATION, ERR_KEY_SIZE_MISMATCH, ERR_RANDOM_SOURCE};
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::{SessionKey, KEY_LEN};
use hkdf::Hkdf;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

const HKDF_INFO: &[u8] = b"reliable-protocol/v1 session key";

const MODP_512_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
    "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFC665F",
);

const MODP_2048_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

static GROUP_512: Lazy<DhGroup> = Lazy::new(|| DhGroup::from_hex(KeySize::Bits512, MODP_512_HEX));
static GROUP_2048: Lazy<DhGroup> =
    Lazy::new(|| DhGroup::from_hex(KeySize::Bits2048, MODP_2048_HEX));

/// Modulus size of the key exchange group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySize {
    Bits512,
    Bits2048,
}

impl KeySize {
    pub fn bits(self) -> u32 {
        match self {
            KeySize::Bits512 => 512,
            KeySize::Bits2048 => 2048,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            512 => Some(KeySize::Bits512),
            2048 => Some(KeySize::Bits2048),
            _ => None,
        }
    }

    /// Length of a public value on the wire
    pub fn byte_len(self) -> usize {
        self.bits() as usize / 8
    }
}

/// Safe-prime group parameters
#[derive(Debug)]
pub struct DhGroup {
    key_size: KeySize,
    p: BigUint,
    q: BigUint,
    g: BigUint,
    p_minus_one: BigUint,
}

impl DhGroup {
    fn from_hex(key_size: KeySize, hex: &str) -> Self {
        let p = BigUint::parse_bytes(hex.as_bytes(), 16)
            .unwrap_or_else(|| unreachable!("group prime constant is valid hex"));
        let one = BigUint::from(1u32);
        let two = BigUint::from(2u32);
        let p_minus_one = &p - &one;
        let q = &p_minus_one / &two;

        Self {
            key_size,
            p,
            q,
            g: two,
            p_minus_one,
        }
    }

    pub fn for_key_size(key_size: KeySize) -> &'static DhGroup {
        match key_size {
            KeySize::Bits512 => &*GROUP_512,
            KeySize::Bits2048 => &*GROUP_2048,
        }
    }

    pub fn key_size(&self) -> KeySize {
        self.key_size
    }

    pub fn prime(&self) -> &BigUint {
        &self.p
    }

    pub fn subgroup_order(&self) -> &BigUint {
        &self.q
    }

    pub fn generator(&self) -> &BigUint {
        &self.g
    }

    /// `1 < y < p - 1` and `y` lies in the order-`q` subgroup
    pub fn is_valid_public(&self, y: &BigUint) -> bool {
        let one = BigUint::from(1u32);
        if *y <= one || *y >= self.p_minus_one {
            return false;
        }
        y.modpow(&self.q, &self.p) == one
    }

    /// Uniform exponent in `[2, q - 2]` by rejection sampling
    fn random_exponent(&self) -> Result<BigUint> {
        let bits = self.q.bits();
        let len = bits.div_ceil(8) as usize;
        let excess = (len as u64 * 8 - bits) as u32;
        let low = BigUint::from(2u32);
        let high = &self.q - &low;

        let mut buf = Zeroizing::new(vec![0u8; len]);
        loop {
            getrandom::fill(&mut buf[..])
                .map_err(|_| ProtocolError::HandshakeError(ERR_RANDOM_SOURCE.to_string()))?;
            buf[0] &= 0xFFu8 >> excess;
            let candidate = BigUint::from_bytes_be(&buf);
            if candidate >= low && candidate <= high {
                return Ok(candidate);
            }
        }
    }
}

/// Left-pad the big-endian encoding of `value` to `len` bytes
fn to_fixed_be(value: &BigUint, len: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(raw.len())];
    out.extend_from_slice(&raw);
    out
}

/// One side's ephemeral key pair
pub struct KeyExchangeSession {
    group: &'static DhGroup,
    /// Big-endian private exponent
    private: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl std::fmt::Debug for KeyExchangeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeSession")
            .field("key_size", &self.group.key_size)
            .field("private", &"<redacted>")
            .finish()
    }
}

impl KeyExchangeSession {
    pub fn generate(key_size: KeySize) -> Result<Self> {
        let group = DhGroup::for_key_size(key_size);
        let len = key_size.byte_len();

        // BigUint temporaries cannot be wiped; only the stored copy is zeroizing
        let x = group.random_exponent()?;
        let public = to_fixed_be(&group.g.modpow(&x, &group.p), len);
        let private = Zeroizing::new(to_fixed_be(&x, len));

        Ok(Self {
            group,
            private,
            public,
        })
    }

    pub fn key_size(&self) -> KeySize {
        self.group.key_size
    }

    /// Fixed-length big-endian public value
    pub fn public_value(&self) -> &[u8] {
        &self.public
    }

    /// Validate the peer's public value and derive the session key. Consumes the
    /// session.
    pub fn derive_shared_key(self, peer_public: &[u8]) -> Result<SessionKey> {
        let len = self.group.key_size.byte_len();
        if peer_public.len() > len {
            warn!(got = peer_public.len(), expected = len, "{}", ERR_KEY_SIZE_MISMATCH);
            return Err(ProtocolError::InvalidPeerPublicKey);
        }

        let y = BigUint::from_bytes_be(peer_public);
        if !self.group.is_valid_public(&y) {
            warn!("peer public value outside the prime-order subgroup");
            return Err(ProtocolError::InvalidPeerPublicKey);
        }

        let x = BigUint::from_bytes_be(&self.private);
        let z = y.modpow(&x, &self.group.p);
        if z <= BigUint::from(1u32) {
            return Err(ProtocolError::WeakSharedSecret);
        }
        let shared = Zeroizing::new(to_fixed_be(&z, len));

        let peer_fixed = to_fixed_be(&y, len);
        let (lower, higher) = if self.public <= peer_fixed {
            (&self.public, &peer_fixed)
        } else {
            (&peer_fixed, &self.public)
        };
        let mut hasher = Sha256::new();
        hasher.update(lower);
        hasher.update(higher);
        let mut salt = hasher.finalize();

        let hk = Hkdf::<Sha256>::new(Some(&salt[..]), &shared[..]);
        let mut okm = [0u8; KEY_LEN];
        let expanded = hk.expand(HKDF_INFO, &mut okm);
        salt.as_mut_slice().zeroize();
        expanded.map_err(|_| ProtocolError::HandshakeError(ERR_KEY_DERIVATION.to_string()))?;

        let key = SessionKey::from_bytes(okm);
        okm.zeroize();
        debug!(bits = self.group.key_size.bits(), "derived session key");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let alice = KeyExchangeSession::generate(KeySize::Bits512).unwrap();
        let bob = KeyExchangeSession::generate(KeySize::Bits512).unwrap();
        let alice_public = alice.public_value().to_vec();
        let bob_public = bob.public_value().to_vec();
        assert_eq!(alice_public.len(), 64);

        let k1 = alice.derive_shared_key(&bob_public).unwrap();
        let k2 = bob.derive_shared_key(&alice_public).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_public_values_in_subgroup() {
        let session = KeyExchangeSession::generate(KeySize::Bits512).unwrap();
        let group = DhGroup::for_key_size(KeySize::Bits512);
        let y = BigUint::from_bytes_be(session.public_value());
        assert!(group.is_valid_public(&y));
    }

    #[test]
    fn test_degenerate_public_values_rejected() {
        let len = KeySize::Bits512.byte_len();
        let group = DhGroup::for_key_size(KeySize::Bits512);
        let p_minus_one = to_fixed_be(&(group.prime() - BigUint::from(1u32)), len);
        let mut one = vec![0u8; len];
        one[len - 1] = 1;

        for bad in [vec![0u8; len], one, p_minus_one, to_fixed_be(group.prime(), len)] {
            let session = KeyExchangeSession::generate(KeySize::Bits512).unwrap();
            assert!(matches!(
                session.derive_shared_key(&bad),
                Err(ProtocolError::InvalidPeerPublicKey)
            ));
        }
    }

    #[test]
    fn test_non_subgroup_value_rejected() {
        // 7 is a quadratic non-residue for this prime
        let session = KeyExchangeSession::generate(KeySize::Bits512).unwrap();
        let group = DhGroup::for_key_size(KeySize::Bits512);
        let seven = BigUint::from(7u32);
        assert_ne!(seven.modpow(group.subgroup_order(), group.prime()), BigUint::from(1u32));
        assert!(matches!(
            session.derive_shared_key(&[7]),
            Err(ProtocolError::InvalidPeerPublicKey)
        ));
    }

    #[test]
    fn test_oversized_public_rejected() {
        let session = KeyExchangeSession::generate(KeySize::Bits512).unwrap();
        assert!(matches!(
            session.derive_shared_key(&[1u8; 65]),
            Err(ProtocolError::InvalidPeerPublicKey)
        ));
    }

    #[test]
    fn test_group_parameters() {
        for size in [KeySize::Bits512, KeySize::Bits2048] {
            let group = DhGroup::for_key_size(size);
            assert_eq!(group.prime().bits(), size.bits() as u64);
            assert_eq!(group.generator(), &BigUint::from(2u32));
            // g generates the order-q subgroup
            assert_eq!(
                group.generator().modpow(group.subgroup_order(), group.prime()),
                BigUint::from(1u32)
            );
        }
    }

    #[test]
    fn test_key_size_bits() {
        assert_eq!(KeySize::from_bits(2048), Some(KeySize::Bits2048));
        assert_eq!(KeySize::from_bits(1024), None);
        assert_eq!(KeySize::Bits2048.byte_len(), 256);
    }
}
