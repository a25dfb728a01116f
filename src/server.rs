//! Socket server (C2): accepts TCP connections, performs the topic-list
//! handshake, registers the transport into the connection registry, and
//! spawns one receiver task per connection forwarding frames to whatever
//! handler is currently registered.
//!
//! Per-connection states are `Accepting -> Handshaking -> Registered ->
//! Receiving -> Closed`; they are not reified as an enum since each is a
//! straight-line stage of `handle_connection`, but the names above match
//! the stages below one-to-one.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::BoltError;
use crate::registry::ConnectionRegistry;
use crate::transport::{ClientTransport, TcpClientTransport};

/// A handler invoked once per inbound data frame (post-handshake). Mirrors
/// the dispatcher's own `InboundHandler`: synchronous by signature, async
/// work is spawned by the closure itself.
pub type FrameHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

pub struct SocketServer {
    registry: Arc<ConnectionRegistry>,
    handler: Mutex<Option<FrameHandler>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl SocketServer {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            registry,
            handler: Mutex::new(None),
            stop_tx,
            stop_rx,
        }
    }

    /// Set (or replace) the handler invoked on every inbound data frame.
    pub async fn register_handler(&self, handler: FrameHandler) {
        *self.handler.lock().await = Some(handler);
    }

    /// Cooperatively stop the accept loop and every receiver task. Does
    /// not forcibly close sockets already blocked in a read; those exit
    /// the next time they observe either a frame or the flag.
    pub fn stop_listening(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Bind and run the accept loop until `stop_listening` is called.
    ///
    /// `backlog` is accepted for configuration parity with the listen
    /// queue depth this codebase's external interface documents; Tokio's
    /// `TcpListener::bind` does not expose a backlog knob, so the OS
    /// default applies and this value is informational only.
    pub async fn listen(
        self: Arc<Self>,
        host: &str,
        port: u16,
        _backlog: u32,
    ) -> Result<(), BoltError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| BoltError::MalformedFrame(format!("bind to {addr} failed: {err}")))?;
        self.listen_on(listener).await
    }

    /// Run the accept loop on an already-bound listener. Exposed so
    /// callers (and tests) that need the OS-assigned port from binding
    /// `:0` can read `local_addr()` before handing the listener over.
    pub async fn listen_on(self: Arc<Self>, listener: TcpListener) -> Result<(), BoltError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "socket server listening");
        }

        let mut stop_rx = self.stop_rx.clone();
        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("socket server stopping");
                        return Ok(());
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer).await;
                            });
                        }
                        Err(err) => warn!(error = %err, "accept failed"),
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let transport = Arc::new(TcpClientTransport::new(stream));

        let handshake = match transport.recv().await {
            Ok(frame) if !frame.is_empty() => frame,
            _ => {
                debug!(%peer, "connection closed before handshake");
                return;
            }
        };

        let topics = match parse_handshake(&handshake) {
            Ok(topics) => topics,
            Err(err) => {
                warn!(%peer, error = %err, "malformed handshake, closing connection");
                transport.close().await;
                return;
            }
        };

        for topic in &topics {
            self.registry.add_client(topic, transport.clone()).await;
        }
        debug!(%peer, ?topics, "connection registered");

        let mut stop_rx = self.stop_rx.clone();
        loop {
            let frame = tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
                result = transport.recv() => result,
            };

            match frame {
                Ok(bytes) if bytes.is_empty() => break,
                Ok(bytes) => {
                    if let Some(handler) = self.handler.lock().await.clone() {
                        handler(bytes);
                    }
                }
                Err(err) => {
                    warn!(%peer, error = %err, "receive error, closing connection");
                    break;
                }
            }
        }

        self.registry.remove_client(transport.id(), None).await;
        transport.close().await;
        debug!(%peer, "connection closed");
    }
}

/// Parse a handshake frame of the form `TOPICLIST:HOSTNAME`. The hostname
/// is accepted but not otherwise used; empty topics are rejected.
fn parse_handshake(frame: &[u8]) -> Result<Vec<String>, BoltError> {
    let text = std::str::from_utf8(frame)
        .map_err(|_| BoltError::MalformedFrame("handshake is not valid utf-8".to_string()))?;
    let (topic_list, _hostname) = text
        .split_once(':')
        .ok_or_else(|| BoltError::MalformedFrame("handshake missing ':' separator".to_string()))?;

    let topics: Vec<String> = topic_list.split(',').map(|s| s.trim().to_string()).collect();
    if topics.is_empty() || topics.iter().any(|t| t.is_empty()) {
        return Err(BoltError::MalformedFrame(
            "handshake contains an empty topic".to_string(),
        ));
    }
    Ok(topics)
}
