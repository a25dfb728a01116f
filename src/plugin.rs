//! Plugin interface (C9): the capability boundary the execution engine
//! consumes to resolve a plugin name into a message schema and an
//! executor factory.
//!
//! This is deliberately the only place the core talks to "plugin code".
//! The real Bolt loader walked a `bolt_modules` directory and
//! duck-typed each module at load time; that dynamic discovery is out
//! of scope here. What the engine actually depends on is this trait
//! boundary, checked by the compiler instead of `dir()` introspection,
//! plus the `InMemoryPluginLoader` reference implementation below for
//! embedding real plugins and for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::EngineHandle;
use crate::error::BoltError;
use crate::message::MessageSchema;

/// The capability a plugin executor must implement: consume one
/// correlated inbound payload, optionally driving the engine through
/// the narrow `EngineHandle` (e.g. to mark itself or a follow-up task
/// complete).
#[async_trait]
pub trait PluginExecutor: Send {
    async fn handle(&mut self, payload: serde_json::Value, engine: EngineHandle);
}

/// Produces fresh `PluginExecutor` instances, one per correlated response.
pub trait PluginExecutorFactory: Send + Sync {
    fn create(&self) -> Box<dyn PluginExecutor>;
}

/// Resolves a plugin name to its message schema and executor factory.
///
/// Implementations are expected to validate a plugin's shape once, at
/// load time, rather than discovering shape mismatches on first
/// dispatch.
pub trait PluginLoader: Send + Sync {
    fn plugin_structure(&self, name: &str) -> Result<MessageSchema, BoltError>;
    fn plugin_executor(&self, name: &str) -> Result<Arc<dyn PluginExecutorFactory>, BoltError>;
}

/// A plugin registered programmatically rather than discovered from disk.
struct RegisteredPlugin {
    schema: MessageSchema,
    factory: Arc<dyn PluginExecutorFactory>,
}

/// Reference `PluginLoader` backed by an in-process registry.
///
/// This is the idiomatic stand-in for the Python loader's dynamic
/// `bolt_modules` directory scan: plugins are registered by name ahead
/// of time (typically at process startup), and validated once here
/// rather than duck-typed per dispatch.
#[derive(Default)]
pub struct InMemoryPluginLoader {
    plugins: HashMap<String, RegisteredPlugin>,
}

impl InMemoryPluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin's schema and executor factory under `name`.
    /// Returns `false` if a plugin with that name is already registered.
    pub fn register(
        &mut self,
        name: &str,
        schema: MessageSchema,
        factory: Arc<dyn PluginExecutorFactory>,
    ) -> bool {
        if self.plugins.contains_key(name) {
            return false;
        }
        self.plugins
            .insert(name.to_string(), RegisteredPlugin { schema, factory });
        true
    }
}

impl PluginLoader for InMemoryPluginLoader {
    fn plugin_structure(&self, name: &str) -> Result<MessageSchema, BoltError> {
        self.plugins
            .get(name)
            .map(|p| p.schema.clone())
            .ok_or_else(|| BoltError::UnknownPlugin(name.to_string()))
    }

    fn plugin_executor(&self, name: &str) -> Result<Arc<dyn PluginExecutorFactory>, BoltError> {
        self.plugins
            .get(name)
            .map(|p| p.factory.clone())
            .ok_or_else(|| BoltError::UnknownPlugin(name.to_string()))
    }
}
