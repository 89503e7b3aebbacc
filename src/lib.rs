//! # reliable-protocol
//!
//! Transport core for real-time multiplayer services: length-delimited framing,
//! optional compression and authenticated encryption, datagram fragmentation,
//! reliable in-order delivery with adaptive retransmission, and a finite-field
//! Diffie-Hellman handshake that derives the session key.
//!
//! The crate owns no sockets. A [`Connection`](protocol::connection::Connection)
//! turns application records into wire bytes and wire bytes back into ordered
//! deliveries; the caller moves the bytes. [`ConnectionWorker`](protocol::worker::ConnectionWorker)
//! runs one connection on a tokio task with a periodic retry scan.
//!
//! ## Layout
//! - [`core`]: frame headers, stream framing and the binary object codec
//! - [`protocol`]: transform pipeline, fragmentation, reliability, key exchange,
//!   connection state and the per-connection worker
//! - [`utils`]: compression, AEAD, buffer pool, metrics and logging setup
//! - [`config`]: TOML / environment configuration
//! - [`error`]: the crate-wide error type
//!
//! ## Example
//! ```rust
//! use reliable_protocol::config::ProtocolConfig;
//! use reliable_protocol::protocol::connection::{Connection, ConnectionEvent, TransportCapabilities};
//! use reliable_protocol::protocol::message::{Delivery, MessageRegistry};
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! let config = ProtocolConfig::default_with_overrides(|c| c.transform.encryption_enabled = false);
//! let mut registry = MessageRegistry::new();
//! registry.register(32, "chat", Delivery::Reliable).unwrap();
//! let registry = Arc::new(registry);
//!
//! let mut alice = Connection::new(config.clone(), registry.clone(), TransportCapabilities::stream(), 1);
//! let mut bob = Connection::new(config, registry, TransportCapabilities::stream(), 2);
//! alice.activate().unwrap();
//! bob.activate().unwrap();
//!
//! let now = Instant::now();
//! let wire = alice.encode(32, &String::from("hello"), now).unwrap();
//! let events = bob.feed(&wire[0], now).unwrap();
//! assert!(events.iter().any(|e| matches!(e, ConnectionEvent::Deliver(_))));
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub use crate::core::header::{DatagramHeader, FragmentHeader, FrameFlags, ParseOutcome, StreamHeader};
pub use crate::core::message::Message;
pub use crate::core::serialization::ObjectCodec;
pub use crate::error::{ProtocolError, Result};
