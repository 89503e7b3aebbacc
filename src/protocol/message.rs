//! Message kinds and the registry of application message ids.
//!
//! Ids below [`FIRST_APPLICATION_ID`] are reserved for control traffic. Each registered
//! id carries a delivery class that decides whether the reliability engine tracks it.

use crate::error::constants::{
    ERR_DUPLICATE_MESSAGE_ID, ERR_RESERVED_MESSAGE_ID, ERR_UNKNOWN_MESSAGE_ID,
};
use crate::error::{ProtocolError, Result};
use std::borrow::Cow;
use std::collections::HashMap;

/// First id available to applications
pub const FIRST_APPLICATION_ID: u16 = 16;

/// Delivery class of a message id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Sequenced, acknowledged, retransmitted and delivered in order
    Reliable,
    /// Sequence 0, fire and forget
    Unreliable,
}

/// Built-in control messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Ack = 1,
    HandshakeInit = 2,
    HandshakeResponse = 3,
    Ping = 4,
    Pong = 5,
    Disconnect = 6,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Ack,
        MessageKind::HandshakeInit,
        MessageKind::HandshakeResponse,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::Disconnect,
    ];

    pub const fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Ack => "ACK",
            MessageKind::HandshakeInit => "HS_INIT",
            MessageKind::HandshakeResponse => "HS_RESP",
            MessageKind::Ping => "PING",
            MessageKind::Pong => "PONG",
            MessageKind::Disconnect => "DISCONNECT",
        }
    }

    pub fn delivery(self) -> Delivery {
        match self {
            MessageKind::HandshakeInit
            | MessageKind::HandshakeResponse
            | MessageKind::Disconnect => Delivery::Reliable,
            MessageKind::Ack | MessageKind::Ping | MessageKind::Pong => Delivery::Unreliable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub id: u16,
    pub name: Cow<'static, str>,
    pub delivery: Delivery,
}

/// Known message ids and their delivery class
#[derive(Debug, Clone)]
pub struct MessageRegistry {
    entries: HashMap<u16, MessageDescriptor>,
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRegistry {
    /// Registry pre-populated with the control kinds
    pub fn new() -> Self {
        let entries = MessageKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind.id(),
                    MessageDescriptor {
                        id: kind.id(),
                        name: Cow::Borrowed(kind.name()),
                        delivery: kind.delivery(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Register an application message id
    pub fn register(
        &mut self,
        id: u16,
        name: impl Into<Cow<'static, str>>,
        delivery: Delivery,
    ) -> Result<()> {
        if id < FIRST_APPLICATION_ID {
            return Err(ProtocolError::ConfigError(format!(
                "{ERR_RESERVED_MESSAGE_ID}: {id}"
            )));
        }
        if self.entries.contains_key(&id) {
            return Err(ProtocolError::ConfigError(format!(
                "{ERR_DUPLICATE_MESSAGE_ID}: {id}"
            )));
        }

        self.entries.insert(
            id,
            MessageDescriptor {
                id,
                name: name.into(),
                delivery,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: u16) -> Option<&MessageDescriptor> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn delivery(&self, id: u16) -> Result<Delivery> {
        self.entries
            .get(&id)
            .map(|descriptor| descriptor.delivery)
            .ok_or_else(|| {
                tracing::debug!(id, "{}", ERR_UNKNOWN_MESSAGE_ID);
                ProtocolError::UnexpectedMessage(id)
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageDescriptor> {
        self.entries.values()
    }
}
