use crate::core::message::Message;
use crate::error::constants::{
    ERR_DISPATCHER_READ_LOCK, ERR_DISPATCHER_WRITE_LOCK, ERR_UNKNOWN_MESSAGE_ID,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::MessageRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A handler may answer with a reply message
type HandlerFn = dyn Fn(&Message) -> Result<Option<Message>> + Send + Sync + 'static;

/// Routes delivered messages to handlers by message id.
/// Only ids known to the registry can be routed.
pub struct Dispatcher {
    registry: Arc<MessageRegistry>,
    handlers: Arc<RwLock<HashMap<u16, Box<HandlerFn>>>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            registry,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, message_id: u16, handler: F) -> Result<()>
    where
        F: Fn(&Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        if !self.registry.contains(message_id) {
            return Err(ProtocolError::ConfigError(format!(
                "{ERR_UNKNOWN_MESSAGE_ID}: {message_id}"
            )));
        }

        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers.insert(message_id, Box::new(handler));
        Ok(())
    }

    pub fn dispatch(&self, msg: &Message) -> Result<Option<Message>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(ERR_DISPATCHER_READ_LOCK.to_string()))?;

        handlers
            .get(&msg.message_id())
            .ok_or(ProtocolError::UnexpectedMessage(msg.message_id()))
            .and_then(|handler| handler(msg))
    }

    pub fn has_handler(&self, message_id: u16) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(&message_id))
            .unwrap_or(false)
    }
}

impl Clone for Dispatcher {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            handlers: self.handlers.clone(),
        }
    }
}
