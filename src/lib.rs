//! # Bolt
//!
//! A dependency-ordered, topic-fanout task dispatch server. Long-lived
//! worker connections subscribe to topics at handshake time; tasks are
//! queued against a named plugin message and a set of dependencies, and
//! the execution engine dispatches each task once its dependencies are
//! all complete, fanning the bound message out to every worker
//! subscribed to its topics.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod message;
pub mod plugin;
pub mod registry;
pub mod server;
pub mod task;
pub mod transport;

pub use config::ServerConfig;
pub use dispatcher::MessageDispatcher;
pub use engine::{EngineHandle, ExecutionEngine};
pub use error::BoltError;
pub use plugin::{InMemoryPluginLoader, PluginExecutor, PluginExecutorFactory, PluginLoader};
pub use registry::ConnectionRegistry;
pub use server::SocketServer;
pub use task::{Task, TaskId, TaskStatus};
pub use transport::{ClientTransport, ConnectionId};

/// The current version of the server.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
