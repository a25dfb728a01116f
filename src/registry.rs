//! Connection registry (C1): topic -> ordered set of client transports.
//!
//! Shared between the socket server (which writes on accept/disconnect)
//! and the dispatcher (which reads on every broadcast). Guarded by a
//! single `tokio::sync::RwLock` since broadcasts vastly outnumber
//! topology changes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::BoltError;
use crate::transport::{ClientTransport, ConnectionId};

pub type Topic = String;

#[derive(Default)]
struct Inner {
    /// `topic -> [transports]`, insertion order preserved per (I-deterministic-broadcast).
    client_list: HashMap<Topic, Vec<Arc<dyn ClientTransport>>>,
}

/// Maps subscription topics to the clients currently subscribed to them.
///
/// A topic entry can exist with zero clients (after `add_topic` or after
/// the last client leaves); it is only ever deleted by `remove_topic`.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Add a topic if absent. Returns the current number of topics.
    /// Idempotent: adding an existing topic is a no-op besides the count.
    pub async fn add_topic(&self, topic: &str) -> usize {
        let mut inner = self.inner.write().await;
        inner.client_list.entry(topic.to_string()).or_default();
        inner.client_list.len()
    }

    /// Register `transport` under `topic`, creating the topic if needed.
    ///
    /// Returns `false` iff the transport (by connection id) was already
    /// present under that topic; otherwise appends it and returns `true`.
    pub async fn add_client(&self, topic: &str, transport: Arc<dyn ClientTransport>) -> bool {
        let mut inner = self.inner.write().await;
        let clients = inner.client_list.entry(topic.to_string()).or_default();
        if clients.iter().any(|c| c.id() == transport.id()) {
            return false;
        }
        clients.push(transport);
        true
    }

    /// Snapshot of all known topic names.
    pub async fn topics(&self) -> Vec<Topic> {
        let inner = self.inner.read().await;
        inner.client_list.keys().cloned().collect()
    }

    /// Snapshot of the clients subscribed to `topic`.
    ///
    /// `None` means the topic has never been added (distinguishable from
    /// `Some(vec![])`, an existing but empty topic).
    pub async fn clients(&self, topic: &str) -> Option<Vec<Arc<dyn ClientTransport>>> {
        let inner = self.inner.read().await;
        inner.client_list.get(topic).cloned()
    }

    /// Remove `transport` from `topic`, or from every topic it belongs to
    /// if `topic` is `None`. A missing transport is a no-op.
    pub async fn remove_client(&self, connection_id: ConnectionId, topic: Option<&str>) {
        let mut inner = self.inner.write().await;
        match topic {
            Some(t) => {
                if let Some(clients) = inner.client_list.get_mut(t) {
                    clients.retain(|c| c.id() != connection_id);
                }
            }
            None => {
                for clients in inner.client_list.values_mut() {
                    clients.retain(|c| c.id() != connection_id);
                }
            }
        }
        debug!(connection_id, ?topic, "removed client from registry");
    }

    /// Delete a topic entirely. Fails with `TopicBusy` if it still has
    /// subscribers and `force` is false.
    pub async fn remove_topic(&self, topic: &str, force: bool) -> Result<(), BoltError> {
        let mut inner = self.inner.write().await;
        if let Some(clients) = inner.client_list.get(topic) {
            if !clients.is_empty() && !force {
                return Err(BoltError::TopicBusy(topic.to_string()));
            }
        }
        inner.client_list.remove(topic);
        Ok(())
    }
}
