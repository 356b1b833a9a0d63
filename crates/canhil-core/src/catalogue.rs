//! Message catalogue container and provider seam

use std::collections::HashMap;

use crate::error::{CanError, CanResult};
use crate::message::{Message, MessageRef};

/// Loads a message catalogue from a source descriptor.
///
/// Parsing of DBC/Excel/JSON sources lives outside this crate; the service
/// layer only consumes the resulting catalogue.
pub trait CatalogueProvider: Send + Sync {
    fn load(&self, source: &str) -> CanResult<MessageCatalogue>;
}

/// The loaded message catalogue: messages by id with a name index and a
/// deep-copied backup of the load-time state for restoring defaults.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalogue {
    by_id: HashMap<u32, Message>,
    name_index: HashMap<String, u32>,
    defaults: HashMap<u32, Message>,
}

impl MessageCatalogue {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut by_id = HashMap::with_capacity(messages.len());
        let mut name_index = HashMap::with_capacity(messages.len());
        for message in messages {
            name_index.insert(message.name.clone(), message.id);
            by_id.insert(message.id, message);
        }
        let defaults = by_id.clone();
        Self {
            by_id,
            name_index,
            defaults,
        }
    }

    /// Resolve a message reference to its id.
    pub fn resolve(&self, msg: &MessageRef) -> CanResult<u32> {
        match msg {
            MessageRef::Id(id) => {
                if self.by_id.contains_key(id) {
                    Ok(*id)
                } else {
                    Err(CanError::UnknownMessage(format!("0x{:X}", id)))
                }
            }
            MessageRef::Name(name) => self
                .name_index
                .get(name)
                .copied()
                .ok_or_else(|| CanError::UnknownMessage(name.clone())),
        }
    }

    pub fn get(&self, id: u32) -> CanResult<&Message> {
        self.by_id
            .get(&id)
            .ok_or_else(|| CanError::UnknownMessage(format!("0x{:X}", id)))
    }

    pub fn get_mut(&mut self, id: u32) -> CanResult<&mut Message> {
        self.by_id
            .get_mut(&id)
            .ok_or_else(|| CanError::UnknownMessage(format!("0x{:X}", id)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Restore messages to their load-time defaults.
    ///
    /// With `ids = None` the whole catalogue is restored; unknown ids in an
    /// explicit list are an error.
    pub fn restore_defaults(&mut self, ids: Option<&[u32]>) -> CanResult<()> {
        match ids {
            None => {
                self.by_id = self.defaults.clone();
                Ok(())
            }
            Some(ids) => {
                for id in ids {
                    let default = self
                        .defaults
                        .get(id)
                        .ok_or_else(|| CanError::UnknownMessage(format!("0x{:X}", id)))?
                        .clone();
                    self.by_id.insert(*id, default);
                }
                Ok(())
            }
        }
    }
}
