//! Application state shared across handlers.

use crate::config::ManagerConfig;
use crate::queue::TaskQueue;
use crate::registry::AgentRegistry;
use crate::store::MemoryStore;
use fleet_core::ports::MachineRepository;
use std::sync::Arc;

pub struct AppState {
    pub registry: AgentRegistry,
    pub queue: TaskQueue,
    pub machines: Arc<dyn MachineRepository>,
}

impl AppState {
    pub fn new(registry: AgentRegistry, queue: TaskQueue, machines: Arc<dyn MachineRepository>) -> Self {
        Self {
            registry,
            queue,
            machines,
        }
    }

    /// State backed by a fresh in-memory store.
    pub fn in_memory(config: &ManagerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = AgentRegistry::new(
            store.clone(),
            store.clone(),
            config.enrollment_key.as_deref(),
            config.heartbeat_timeout(),
        );
        let queue = TaskQueue::new(store.clone(), store.clone(), store.clone(), config.claim_limit);
        Self::new(registry, queue, store)
    }
}
