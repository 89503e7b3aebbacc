//! Key exchange handshake.
//!
//! Two messages, both carried as reliable control messages with no encryption:
//!
//! ```text
//! initiator                                   responder
//!   initiator_start()  ── HandshakeInit ──▶
//!                                             responder_accept()
//!                      ◀── HandshakeResponse ──
//!   initiator_finish()
//! ```
//!
//! State is per session: the initiator keeps an [`InitiatorHandshake`] between the two
//! steps and consumes it on completion, so concurrent handshakes never share state.
//! The responder derives its key while answering; a rejection still produces a
//! response carrying the error code, and no key.

use crate::config::ProtocolConfig;
use crate::error::constants::{ERR_HANDSHAKE_REJECTED, ERR_SESSION_MISMATCH};
use crate::error::{ProtocolError, Result};
use crate::protocol::dh::{KeyExchangeSession, KeySize};
use crate::utils::crypto::SessionKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeErrorCode {
    Ok,
    UnsupportedKeySize,
    InvalidPublicKey,
    Busy,
}

/// Responder's retransmission and reassembly timing, offered to the initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeTimeouts {
    pub initial_rto_ms: u32,
    pub max_rto_ms: u32,
    pub max_attempts: u32,
    pub reassembly_timeout_ms: u32,
}

impl HandshakeTimeouts {
    pub fn from_config(config: &ProtocolConfig) -> Self {
        let ms = |d: Duration| d.as_millis().min(u32::MAX as u128) as u32;
        Self {
            initial_rto_ms: ms(config.reliability.initial_rto),
            max_rto_ms: ms(config.reliability.max_rto),
            max_attempts: config.reliability.max_attempts,
            reassembly_timeout_ms: ms(config.fragmentation.reassembly_timeout),
        }
    }

    /// Adopt the offered timing, keeping values the local config cannot honour
    pub fn apply(&self, config: &mut ProtocolConfig) {
        let initial = Duration::from_millis(self.initial_rto_ms as u64);
        let max = Duration::from_millis(self.max_rto_ms as u64);
        if max >= config.reliability.min_rto {
            config.reliability.max_rto = max;
        }
        if initial >= config.reliability.min_rto && initial <= config.reliability.max_rto {
            config.reliability.initial_rto = initial;
        }
        // a lowered max_rto may leave the kept initial_rto above it
        let reliability = &mut config.reliability;
        reliability.initial_rto = reliability
            .initial_rto
            .min(reliability.max_rto)
            .max(reliability.min_rto);
        if self.max_attempts > 0 {
            config.reliability.max_attempts = self.max_attempts;
        }
        if self.reassembly_timeout_ms > 0 {
            config.fragmentation.reassembly_timeout =
                Duration::from_millis(self.reassembly_timeout_ms as u64);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInit {
    pub session_id: u64,
    pub peer_id: u32,
    pub key_size_bits: u32,
    pub public_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub error_code: HandshakeErrorCode,
    pub session_id: u64,
    pub peer_id: u32,
    pub public_value: Vec<u8>,
    pub timeouts: HandshakeTimeouts,
}

/// Initiator state between sending the init and receiving the response
#[derive(Debug)]
pub struct InitiatorHandshake {
    session: KeyExchangeSession,
    session_id: u64,
}

impl InitiatorHandshake {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn key_size(&self) -> KeySize {
        self.session.key_size()
    }
}

/// Generate an ephemeral key pair and the init message carrying its public value
#[instrument(level = "debug")]
pub fn initiator_start(
    local_peer_id: u32,
    key_size: KeySize,
) -> Result<(InitiatorHandshake, HandshakeInit)> {
    let session = KeyExchangeSession::generate(key_size)?;
    let session_id: u64 = rand::random();

    let init = HandshakeInit {
        session_id,
        peer_id: local_peer_id,
        key_size_bits: key_size.bits(),
        public_value: session.public_value().to_vec(),
    };
    debug!(session_id, "handshake init prepared");

    Ok((InitiatorHandshake { session, session_id }, init))
}

/// Responder's answer to a [`HandshakeInit`]
#[derive(Debug)]
pub enum ResponderOutcome {
    Accepted {
        response: HandshakeResponse,
        key: SessionKey,
    },
    Rejected {
        response: HandshakeResponse,
        error: ProtocolError,
    },
}

impl ResponderOutcome {
    pub fn response(&self) -> &HandshakeResponse {
        match self {
            ResponderOutcome::Accepted { response, .. } => response,
            ResponderOutcome::Rejected { response, .. } => response,
        }
    }
}

/// Build a rejection for `init` without touching key material
pub fn reject(
    init: &HandshakeInit,
    local_peer_id: u32,
    code: HandshakeErrorCode,
    timeouts: HandshakeTimeouts,
) -> HandshakeResponse {
    HandshakeResponse {
        error_code: code,
        session_id: init.session_id,
        peer_id: local_peer_id,
        public_value: Vec::new(),
        timeouts,
    }
}

/// Validate `init`, generate the responder key pair and derive the session key
#[instrument(level = "debug", skip(init, timeouts), fields(session_id = init.session_id))]
pub fn responder_accept(
    init: &HandshakeInit,
    local_peer_id: u32,
    supported: &[KeySize],
    timeouts: HandshakeTimeouts,
) -> ResponderOutcome {
    let key_size = match KeySize::from_bits(init.key_size_bits) {
        Some(size) if supported.contains(&size) => size,
        _ => {
            warn!(bits = init.key_size_bits, "unsupported key size");
            return ResponderOutcome::Rejected {
                response: reject(init, local_peer_id, HandshakeErrorCode::UnsupportedKeySize, timeouts),
                error: ProtocolError::HandshakeError(format!(
                    "unsupported key size: {}",
                    init.key_size_bits
                )),
            };
        }
    };

    let session = match KeyExchangeSession::generate(key_size) {
        Ok(session) => session,
        Err(error) => {
            return ResponderOutcome::Rejected {
                response: reject(init, local_peer_id, HandshakeErrorCode::Busy, timeouts),
                error,
            }
        }
    };
    let public_value = session.public_value().to_vec();

    match session.derive_shared_key(&init.public_value) {
        Ok(key) => {
            debug!("handshake accepted");
            ResponderOutcome::Accepted {
                response: HandshakeResponse {
                    error_code: HandshakeErrorCode::Ok,
                    session_id: init.session_id,
                    peer_id: local_peer_id,
                    public_value,
                    timeouts,
                },
                key,
            }
        }
        Err(error) => {
            warn!(%error, "rejecting handshake");
            ResponderOutcome::Rejected {
                response: reject(init, local_peer_id, HandshakeErrorCode::InvalidPublicKey, timeouts),
                error,
            }
        }
    }
}

/// Complete the exchange from the responder's answer
#[instrument(level = "debug", skip(state, response), fields(session_id = state.session_id))]
pub fn initiator_finish(
    state: InitiatorHandshake,
    response: &HandshakeResponse,
) -> Result<(SessionKey, HandshakeTimeouts)> {
    if response.session_id != state.session_id {
        return Err(ProtocolError::HandshakeError(ERR_SESSION_MISMATCH.to_string()));
    }
    if response.error_code != HandshakeErrorCode::Ok {
        return Err(ProtocolError::HandshakeError(format!(
            "{ERR_HANDSHAKE_REJECTED}: {:?}",
            response.error_code
        )));
    }

    let key = state.session.derive_shared_key(&response.public_value)?;
    debug!("handshake complete");
    Ok((key, response.timeouts))
}
