//! Execution engine (C8): queues tasks, resolves dependencies, drives
//! dispatch through the message dispatcher (C6), and correlates inbound
//! responses back to the task that produced the outbound packet.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::dispatcher::{InboundMessage, MessageDispatcher};
use crate::error::BoltError;
use crate::plugin::PluginLoader;
use crate::task::{Task, TaskId, TaskQueue, TaskStatus};

struct State {
    tasks: TaskQueue,
    /// Plugins already registered with the dispatcher, mapped to the
    /// topics they were first registered with. The dispatcher's message
    /// store is keyed by plugin name alone, so the topic set is fixed
    /// at first dispatch; a later task naming different topics is
    /// logged and still uses the topics already on file, rather than
    /// silently broadcasting to the wrong audience.
    registered_plugins: HashMap<String, Vec<String>>,
}

/// Exclusively owns C7 (the task queue); drives dispatch via a shared
/// `MessageDispatcher`.
pub struct ExecutionEngine {
    state: Mutex<State>,
    /// `PacketId -> TaskId`, populated on successful dispatch and
    /// retained for the task's lifetime (a task may produce multiple
    /// responses). A plain `std::sync::Mutex` because it is written
    /// synchronously from inside the dispatcher's `on_assigned` hook,
    /// before the dispatcher has performed any fan-out write.
    packet_to_task: std::sync::Mutex<HashMap<String, TaskId>>,
    dispatcher: Arc<MessageDispatcher>,
    plugin_loader: Arc<dyn PluginLoader>,
}

/// The narrow capability handed to a plugin executor instead of the
/// full engine, only what `handle` legitimately needs to drive
/// follow-up work, avoiding a reference cycle back into the engine.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<ExecutionEngine>,
}

impl EngineHandle {
    pub async fn update_task(&self, id: TaskId, status: TaskStatus) -> bool {
        self.engine.update_task(id, status).await
    }

    pub async fn new_task(
        &self,
        name: &str,
        plugin_name: &str,
        params: Map<String, Value>,
        topics: Vec<String>,
        dependencies: Vec<TaskId>,
    ) -> TaskId {
        self.engine
            .new_task(name, plugin_name, params, topics, dependencies)
            .await
    }
}

impl ExecutionEngine {
    pub fn new(dispatcher: Arc<MessageDispatcher>, plugin_loader: Arc<dyn PluginLoader>) -> Self {
        Self {
            state: Mutex::new(State {
                tasks: TaskQueue::new(),
                registered_plugins: HashMap::new(),
            }),
            packet_to_task: std::sync::Mutex::new(HashMap::new()),
            dispatcher,
            plugin_loader,
        }
    }

    /// Wire this engine up as the dispatcher's inbound handler. Must be
    /// called once, after the engine is behind an `Arc`, before traffic
    /// starts flowing.
    pub async fn attach(self: &Arc<Self>) {
        let engine = self.clone();
        self.dispatcher
            .set_inbound_handler(Arc::new(move |msg: InboundMessage| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.on_inbound_message(msg).await;
                });
            }))
            .await;
    }

    pub async fn new_task(
        &self,
        name: &str,
        plugin_name: &str,
        params: Map<String, Value>,
        topics: Vec<String>,
        dependencies: Vec<TaskId>,
    ) -> TaskId {
        let mut state = self.state.lock().await;
        state
            .tasks
            .queue_task(name, plugin_name, params, topics, dependencies)
    }

    pub async fn update_task(&self, id: TaskId, status: TaskStatus) -> bool {
        let mut state = self.state.lock().await;
        state.tasks.change_task_status(id, status).is_ok()
    }

    /// Scan the task queue in insertion order and dispatch every task
    /// whose dependencies are all `Complete`. An empty dependency list
    /// is trivially ready (the Python original misread "no dependencies"
    /// as "never ready", a bug; corrected here).
    pub async fn cycle_tasks(self: &Arc<Self>) {
        let ready: Vec<TaskId> = {
            let state = self.state.lock().await;
            state
                .tasks
                .iter_in_order()
                .filter(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Pending))
                .filter(|t| Self::dependencies_complete(&state.tasks, &t.dependencies))
                .map(|t| t.id)
                .collect()
        };

        for id in ready {
            self.execute_task(id).await;
        }
    }

    fn dependencies_complete(tasks: &TaskQueue, dependencies: &[TaskId]) -> bool {
        dependencies.iter().all(|dep| {
            tasks
                .get_task_status(*dep)
                .map(|status| status == TaskStatus::Complete)
                .unwrap_or(false)
        })
    }

    /// Resolve the task, ensure its plugin message is registered with
    /// the dispatcher, and dispatch it. On success the task moves to
    /// `Running` and its packet id is recorded for correlation; on
    /// failure the task is left at its prior status.
    pub async fn execute_task(self: &Arc<Self>, id: TaskId) -> Result<(), BoltError> {
        let task: Task = {
            let state = self.state.lock().await;
            match state.tasks.get_task(id) {
                Ok(t) => t.clone(),
                Err(_) => return Ok(()),
            }
        };

        let schema = match self.plugin_loader.plugin_structure(&task.plugin_name) {
            Ok(schema) => schema,
            Err(err) => {
                warn!(task = %id, plugin = %task.plugin_name, "plugin not found, task left unchanged");
                return Err(err);
            }
        };

        let already_registered = {
            let state = self.state.lock().await;
            state.registered_plugins.get(&task.plugin_name).cloned()
        };
        match already_registered {
            None => {
                let registered = self
                    .dispatcher
                    .register_message(&task.plugin_name, schema, task.topics.clone())
                    .await;
                if registered {
                    let mut state = self.state.lock().await;
                    state
                        .registered_plugins
                        .insert(task.plugin_name.clone(), task.topics.clone());
                }
            }
            Some(topics) if topics != task.topics => {
                warn!(
                    task = %id,
                    plugin = %task.plugin_name,
                    registered = ?topics,
                    requested = ?task.topics,
                    "plugin already registered with different topics, keeping topics fixed at first dispatch"
                );
            }
            Some(_) => {}
        }

        let engine = self.clone();
        match self
            .dispatcher
            .send_message(&task.plugin_name, task.params.clone(), move |packet_id| {
                engine
                    .packet_to_task
                    .lock()
                    .unwrap()
                    .insert(packet_id.as_str().to_string(), id);
            })
            .await
        {
            Ok(packet_id) => {
                let mut state = self.state.lock().await;
                state.tasks.change_task_status(id, TaskStatus::Running)?;
                info!(task = %id, packet = %packet_id, "dispatched task");
                Ok(())
            }
            Err(err) => {
                self.packet_to_task.lock().unwrap().retain(|_, t| *t != id);
                warn!(task = %id, error = %err, "dispatch failed, task left at prior status");
                Err(err)
            }
        }
    }

    /// Correlate an inbound response to the task that produced the
    /// originating packet, then hand it to a fresh plugin executor
    /// instance through the narrow `EngineHandle`.
    pub async fn on_inbound_message(self: &Arc<Self>, msg: InboundMessage) {
        let task_id = {
            let map = self.packet_to_task.lock().unwrap();
            match map.get(msg.id.as_str()).copied() {
                Some(id) => id,
                None => {
                    warn!(packet = %msg.id, "inbound packet id does not correlate to any task");
                    return;
                }
            }
        };

        let plugin_name = {
            let state = self.state.lock().await;
            match state.tasks.get_task(task_id) {
                Ok(task) => task.plugin_name.clone(),
                Err(_) => return,
            }
        };

        let factory = match self.plugin_loader.plugin_executor(&plugin_name) {
            Ok(factory) => factory,
            Err(err) => {
                error!(task = %task_id, plugin = %plugin_name, error = %err, "no executor for plugin");
                return;
            }
        };

        let handle = EngineHandle {
            engine: self.clone(),
        };
        let mut executor = factory.create();
        executor.handle(msg.result, handle).await;
    }
}
