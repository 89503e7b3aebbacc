//! # Protocol Layer
//!
//! Everything above raw framing:
//! - [`message`]: message id registry and control message kinds
//! - [`pipeline`]: compress / encrypt on send, the reverse on receive
//! - [`fragment`]: split and reassemble payloads larger than one datagram
//! - [`reliability`]: sequencing, acks, retransmission and ordered delivery
//! - [`dh`] and [`handshake`]: finite-field Diffie-Hellman key agreement
//! - [`connection`]: one peer's state machine tying the pieces together
//! - [`worker`]: a tokio task driving a connection with a periodic retry scan
//! - [`dispatcher`]: route delivered messages to handlers by id

pub mod connection;
pub mod dh;
pub mod dispatcher;
pub mod fragment;
pub mod handshake;
pub mod message;
pub mod pipeline;
pub mod reliability;
pub mod worker;
