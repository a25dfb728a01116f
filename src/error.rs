//! Error taxonomy shared by every core component (C1-C9).
//!
//! Each variant maps directly to one of the error kinds in the design
//! document's error handling section. Components return `BoltError`
//! directly; only the binary entry point converts into `anyhow::Error`
//! at the process boundary.

use thiserror::Error;

/// The single error type threaded through the connection registry,
/// dispatcher, task queue and execution engine.
#[derive(Debug, Error)]
pub enum BoltError {
    /// Re-registering a message or topic where uniqueness is required.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// `get_message` looked up a name that was never registered.
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// A task id was not found in the task queue.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// A plugin name has no registered schema or executor factory.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// A topic was looked up that has never been added to the registry.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// `send_message` was given a parameter key absent from the schema.
    #[error("parameter '{0}' not present in message schema")]
    ParamMismatch(String),

    /// Transport-level send failure, naming the topic that failed.
    #[error("dispatch failed for topic '{topic}': {source}")]
    DispatchFailed {
        topic: String,
        #[source]
        source: std::io::Error,
    },

    /// Attempted to remove a non-empty topic without `force`.
    #[error("topic '{0}' is busy (still has subscribed clients)")]
    TopicBusy(String),

    /// A handshake or inbound frame failed structural parsing.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
