//! Message store (C3): named schemas that plugins register once and the
//! dispatcher treats as templates for every bound send.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::BoltError;

/// A plugin-supplied field template: `field-name -> default value`.
///
/// `serde_json::Map` is backed by a `BTreeMap` (the `preserve_order`
/// feature is not enabled), so iterating a schema always yields keys in
/// sorted order, which is exactly the canonical ordering the packet
/// digest in `message::packet` relies on.
pub type MessageSchema = Map<String, Value>;

/// In-memory registry of message schemas, keyed by name.
#[derive(Default)]
pub struct MessageStore {
    messages: HashMap<String, MessageSchema>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new schema. Fails with `DuplicateName` if `name` is
    /// already registered.
    pub fn add_message(&mut self, name: &str, schema: MessageSchema) -> Result<(), BoltError> {
        if self.messages.contains_key(name) {
            return Err(BoltError::DuplicateName(name.to_string()));
        }
        self.messages.insert(name.to_string(), schema);
        Ok(())
    }

    /// Remove a schema. Fails with `UnknownMessage` if it was never registered.
    pub fn remove_message(&mut self, name: &str) -> Result<(), BoltError> {
        self.messages
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BoltError::UnknownMessage(name.to_string()))
    }

    /// Fetch a clone of the schema so callers can bind values without
    /// mutating the stored template.
    pub fn get_message(&self, name: &str) -> Result<MessageSchema, BoltError> {
        self.messages
            .get(name)
            .cloned()
            .ok_or_else(|| BoltError::UnknownMessage(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.messages.contains_key(name)
    }
}
