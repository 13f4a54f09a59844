//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and external
//! adapters: the manager's stores on one side, the agent's view of the
//! manager on the other.

use crate::agent::{Agent, ResourceSample};
use crate::api::{CompleteTaskRequest, RegisterRequest, RegisterResponse};
use crate::ids::*;
use crate::machine::Machine;
use crate::server::GameServerInstance;
use crate::task::{Task, TaskStatus};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Repository for machines.
#[async_trait]
pub trait MachineRepository: Send + Sync {
    async fn create(&self, machine: &Machine) -> Result<MachineId>;

    async fn get(&self, id: MachineId) -> Result<Option<Machine>>;

    async fn list(&self) -> Result<Vec<Machine>>;

    /// Record a heartbeat relayed by one of the machine's agents.
    async fn touch(&self, id: MachineId, at: DateTime<Utc>) -> Result<()>;

    /// Deregister a machine. Its agents are detached, not deleted.
    async fn delete(&self, id: MachineId) -> Result<()>;
}

/// Repository for agents.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Insert or update by agent id.
    async fn upsert(&self, agent: &Agent) -> Result<()>;

    async fn get(&self, id: AgentId) -> Result<Option<Agent>>;

    async fn list(&self) -> Result<Vec<Agent>>;

    /// Replace the stored key digest. The previous key stops working at once.
    async fn set_api_key_hash(&self, id: AgentId, hash: &str) -> Result<()>;

    /// Record a heartbeat with its resource sample.
    async fn heartbeat(
        &self,
        id: AgentId,
        resources: &ResourceSample,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Find the agent whose key digest matches.
    async fn find_by_api_key_hash(&self, hash: &str) -> Result<Option<Agent>>;
}

/// Repository for tasks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> Result<TaskId>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    async fn list_for_agent(&self, agent_id: AgentId, status: Option<TaskStatus>)
    -> Result<Vec<Task>>;

    /// Atomically move up to `limit` of the agent's pending tasks to
    /// running and return them, oldest first. A task is returned by at most
    /// one call.
    async fn claim_pending(&self, agent_id: AgentId, limit: usize) -> Result<Vec<Task>>;

    /// Apply a status change, enforcing the task state machine.
    async fn update(&self, task: &Task) -> Result<()>;
}

/// Repository for provisioned servers.
#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn upsert(&self, server: &GameServerInstance) -> Result<()>;

    async fn get(&self, id: &ServerId) -> Result<Option<GameServerInstance>>;

    async fn list_for_agent(&self, agent_id: AgentId) -> Result<Vec<GameServerInstance>>;

    async fn delete(&self, id: &ServerId) -> Result<()>;
}

/// The manager as seen by an agent.
#[async_trait]
pub trait ManagerApi: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse>;

    async fn heartbeat(&self, agent_id: AgentId, resources: &ResourceSample) -> Result<()>;

    async fn pending_tasks(&self, agent_id: AgentId) -> Result<Vec<Task>>;

    async fn complete_task(&self, request: &CompleteTaskRequest) -> Result<()>;
}
