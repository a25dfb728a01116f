//! # Bolt Server - Main Entry Point
//!
//! Wires up the core components and runs the accept loop:
//! 1. Parse configuration (CLI flags layered over environment variables).
//! 2. Initialize structured logging.
//! 3. Construct the connection registry, dispatcher, execution engine,
//!    and socket server, and cross-wire their handlers.
//! 4. Spawn the periodic `cycle_tasks()` ticker.
//! 5. Run the accept loop until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::time::{self, Duration};
use tracing::info;

use bolt_server::{ConnectionRegistry, ExecutionEngine, InMemoryPluginLoader, MessageDispatcher, ServerConfig, SocketServer};

mod logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    let _log_guard = logging::init_tracing(&config);

    info!("starting bolt server");

    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(registry.clone()));

    // No plugins are embedded by this binary; operators building on top
    // of this crate construct their own `PluginLoader` and link it in
    // here instead of `InMemoryPluginLoader::new()`.
    let plugin_loader = Arc::new(InMemoryPluginLoader::new());
    let engine = Arc::new(ExecutionEngine::new(dispatcher.clone(), plugin_loader));
    engine.attach().await;

    let server = Arc::new(SocketServer::new(registry));
    let dispatcher_for_frames = dispatcher.clone();
    server
        .register_handler(Arc::new(move |frame: Vec<u8>| {
            let dispatcher = dispatcher_for_frames.clone();
            tokio::spawn(async move {
                dispatcher.on_inbound(&frame).await;
            });
        }))
        .await;

    let ticker_engine = engine.clone();
    let cycle_interval = Duration::from_millis(config.cycle_interval_ms);
    tokio::spawn(async move {
        let mut interval = time::interval(cycle_interval);
        loop {
            interval.tick().await;
            ticker_engine.cycle_tasks().await;
        }
    });

    let listen_server = server.clone();
    let host = config.host.clone();
    let port = config.port;
    let backlog = config.connection_wait_queue;
    let accept_loop = tokio::spawn(async move { listen_server.listen(&host, port, backlog).await });

    tokio::select! {
        result = accept_loop => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            server.stop_listening();
        }
    }

    Ok(())
}
