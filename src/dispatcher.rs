//! Message dispatcher (C6): composes the message store, register, and
//! queue (C3-C5) with the connection registry (C1) to bind parameters,
//! assign packet ids, fan out over subscribed topics, and correlate
//! inbound responses back to whoever is listening (the execution engine).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::BoltError;
use crate::message::{MessagePacket, MessageQueue, MessageSchema, MessageStatus, MessageStore, PacketId};
use crate::registry::ConnectionRegistry;

/// What the dispatcher forwards to its registered inbound handler once
/// a response frame has been parsed and correlated in the queue.
pub struct InboundMessage {
    pub id: PacketId,
    pub result: Value,
}

/// A closure invoked once per correlated inbound frame.
pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

struct State {
    store: MessageStore,
    /// `message name -> topics it broadcasts to`.
    register: HashMap<String, Vec<String>>,
    queue: MessageQueue,
}

/// Owns C3-C5 exclusively; reads/writes the shared connection registry
/// for C1/C2's part of sending and receiving.
pub struct MessageDispatcher {
    state: Mutex<State>,
    registry: Arc<ConnectionRegistry>,
    handler: Mutex<Option<InboundHandler>>,
}

impl MessageDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            state: Mutex::new(State {
                store: MessageStore::new(),
                register: HashMap::new(),
                queue: MessageQueue::new(),
            }),
            registry,
            handler: Mutex::new(None),
        }
    }

    /// Set (or replace) the handler invoked on every correlated inbound frame.
    pub async fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.handler.lock().await = Some(handler);
    }

    /// Register a new message schema under `name`, broadcasting to `topics`
    /// on every future `send_message`. Returns `false` on duplicate name.
    pub async fn register_message(
        &self,
        name: &str,
        schema: MessageSchema,
        topics: Vec<String>,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.store.add_message(name, schema).is_err() {
            return false;
        }
        state.register.insert(name.to_string(), topics);
        true
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.state.lock().await.store.contains(name)
    }

    /// Remove a message's schema and topic registration. Missing name is a no-op.
    pub async fn unregister_message(&self, name: &str) {
        let mut state = self.state.lock().await;
        let _ = state.store.remove_message(name);
        state.register.remove(name);
    }

    /// Bind `params` over `name`'s schema, assign a packet id, and fan
    /// the resulting wire frame out to every topic the message is
    /// registered for, in registration order per topic.
    ///
    /// `on_assigned` runs after the packet id is minted and queued but
    /// before the first network write of the fan-out below, so a caller
    /// that needs to correlate inbound responses (the execution engine,
    /// recording `PacketId -> TaskId`) can do so before any client has a
    /// chance to see the packet and reply to it.
    pub async fn send_message<F>(
        &self,
        name: &str,
        params: Map<String, Value>,
        on_assigned: F,
    ) -> Result<PacketId, BoltError>
    where
        F: FnOnce(&PacketId) + Send,
    {
        let (packet, topics) = {
            let mut state = self.state.lock().await;
            let mut bound = state.store.get_message(name)?;
            for (key, value) in params {
                if !bound.contains_key(&key) {
                    return Err(BoltError::ParamMismatch(key));
                }
                bound.insert(key, value);
            }
            let topics = state
                .register
                .get(name)
                .cloned()
                .ok_or_else(|| BoltError::UnknownMessage(name.to_string()))?;
            let packet = MessagePacket::new(bound);
            state.queue.queue(packet.id().clone());
            (packet, topics)
        };

        on_assigned(packet.id());

        let wire = packet.to_wire();
        for topic in &topics {
            let clients = self.registry.clients(topic).await.unwrap_or_default();
            for client in clients {
                if let Err(source) = client.send(&wire).await {
                    warn!(topic = %topic, error = %source, "dispatch failed");
                    return Err(BoltError::DispatchFailed {
                        topic: topic.clone(),
                        source,
                    });
                }
            }
        }

        Ok(packet.id().clone())
    }

    /// Parse an inbound frame, mark its packet `Delivered` in the queue,
    /// and forward it to the registered handler exactly once.
    ///
    /// An id with no queue entry is logged and dropped rather than
    /// treated as a fatal error; a response may race an unrelated
    /// restart of the message register in a future extension.
    pub async fn on_inbound(&self, frame: &[u8]) {
        let (id, payload) = match MessagePacket::from_wire(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "dropping malformed inbound frame");
                return;
            }
        };

        {
            let mut state = self.state.lock().await;
            if state
                .queue
                .update_status(&id, MessageStatus::Delivered(Value::Object(payload.clone())))
                .is_err()
            {
                debug!(id = %id, "inbound frame for unknown packet id, dropping");
                return;
            }
        }

        if let Some(handler) = self.handler.lock().await.clone() {
            handler(InboundMessage {
                id,
                result: Value::Object(payload),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ClientTransport;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingTransport {
        id: u64,
        sent: TokioMutex<Vec<Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl ClientTransport for RecordingTransport {
        fn id(&self) -> u64 {
            self.id
        }

        async fn send(&self, frame: &[u8]) -> std::io::Result<()> {
            self.sent.lock().await.push(frame.to_vec());
            Ok(())
        }

        async fn recv(&self) -> std::io::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn close(&self) {}
    }

    fn schema() -> MessageSchema {
        let mut m = Map::new();
        m.insert("msg".to_string(), Value::String(String::new()));
        m
    }

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn new_transport() -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            sent: TokioMutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn send_message_binds_params_and_fans_out() {
        let registry = Arc::new(ConnectionRegistry::new());
        let transport = new_transport();
        registry.add_client("Test", transport.clone()).await;

        let dispatcher = MessageDispatcher::new(registry);
        assert!(
            dispatcher
                .register_message("ping", schema(), vec!["Test".into()])
                .await
        );

        let mut params = Map::new();
        params.insert("msg".to_string(), Value::String("hi".to_string()));
        let id = dispatcher.send_message("ping", params, |_| {}).await.unwrap();

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let (wire_id, payload) = MessagePacket::from_wire(&sent[0][..sent[0].len() - 1]).unwrap();
        assert_eq!(wire_id, id);
        assert_eq!(payload.get("msg"), Some(&Value::String("hi".to_string())));
    }

    #[tokio::test]
    async fn unknown_param_is_rejected() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = MessageDispatcher::new(registry);
        dispatcher
            .register_message("ping", schema(), vec!["Test".into()])
            .await;

        let mut params = Map::new();
        params.insert("other".to_string(), Value::from(1));
        let err = dispatcher
            .send_message("ping", params, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BoltError::ParamMismatch(k) if k == "other"));
    }

    #[tokio::test]
    async fn on_assigned_runs_before_any_fan_out_write() {
        let registry = Arc::new(ConnectionRegistry::new());
        let transport = new_transport();
        registry.add_client("Test", transport.clone()).await;

        let dispatcher = MessageDispatcher::new(registry);
        dispatcher
            .register_message("ping", schema(), vec!["Test".into()])
            .await;

        let mut params = Map::new();
        params.insert("msg".to_string(), Value::String("hi".to_string()));

        let seen_before_send = Arc::new(TokioMutex::new(false));
        let seen_before_send_clone = seen_before_send.clone();
        let transport_for_check = transport.clone();
        dispatcher
            .send_message("ping", params, move |_id| {
                // try_lock succeeds here iff no write has happened yet,
                // since RecordingTransport::send briefly holds this same lock.
                if let Ok(sent) = transport_for_check.sent.try_lock() {
                    let mut seen = seen_before_send_clone.try_lock().unwrap();
                    *seen = sent.is_empty();
                }
            })
            .await
            .unwrap();

        assert!(*seen_before_send.lock().await);
    }

    #[tokio::test]
    async fn inbound_frame_invokes_handler_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(MessageDispatcher::new(registry));
        dispatcher
            .register_message("ping", schema(), vec![])
            .await;

        let mut params = Map::new();
        params.insert("msg".to_string(), Value::String("hi".to_string()));
        let id = dispatcher.send_message("ping", params, |_| {}).await.unwrap();

        let received = Arc::new(TokioMutex::new(Vec::new()));
        let received_clone = received.clone();
        dispatcher
            .set_inbound_handler(Arc::new(move |msg: InboundMessage| {
                let received = received_clone.clone();
                tokio::spawn(async move {
                    received.lock().await.push(msg.id);
                });
            }))
            .await;

        let mut reply = Map::new();
        reply.insert("result".to_string(), Value::String("ok".to_string()));
        let wire = serde_json::to_vec(&crate::message::WireFrame {
            id: id.as_str().to_string(),
            payload: reply,
        })
        .unwrap();

        dispatcher.on_inbound(&wire).await;
        tokio::task::yield_now().await;
        assert_eq!(received.lock().await.as_slice(), &[id]);
    }
}
