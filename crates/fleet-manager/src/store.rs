//! In-memory implementation of the repository ports.
//!
//! Every collection sits behind its own `tokio::sync::RwLock`. Operations
//! that must be atomic (claiming, state transitions) take the write lock
//! once and finish under it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::agent::{Agent, ResourceSample};
use fleet_core::ids::{AgentId, MachineId, ServerId, TaskId};
use fleet_core::machine::{Machine, MachineStatus};
use fleet_core::ports::{AgentRepository, MachineRepository, ServerRepository, TaskRepository};
use fleet_core::server::GameServerInstance;
use fleet_core::task::{Task, TaskStatus};
use fleet_core::{Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    machines: RwLock<HashMap<MachineId, Machine>>,
    agents: RwLock<HashMap<AgentId, Agent>>,
    tasks: RwLock<HashMap<TaskId, Task>>,
    servers: RwLock<HashMap<ServerId, GameServerInstance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MachineRepository for MemoryStore {
    async fn create(&self, machine: &Machine) -> Result<MachineId> {
        self.machines
            .write()
            .await
            .insert(machine.id, machine.clone());
        Ok(machine.id)
    }

    async fn get(&self, id: MachineId) -> Result<Option<Machine>> {
        Ok(self.machines.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Machine>> {
        let mut machines: Vec<Machine> = self.machines.read().await.values().cloned().collect();
        machines.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(machines)
    }

    async fn touch(&self, id: MachineId, at: DateTime<Utc>) -> Result<()> {
        let mut machines = self.machines.write().await;
        let machine = machines
            .get_mut(&id)
            .ok_or_else(|| Error::MachineNotFound(id.to_string()))?;
        machine.last_heartbeat_at = Some(at);
        if machine.status == MachineStatus::Offline {
            machine.status = MachineStatus::Online;
        }
        Ok(())
    }

    async fn delete(&self, id: MachineId) -> Result<()> {
        if self.machines.write().await.remove(&id).is_none() {
            return Err(Error::MachineNotFound(id.to_string()));
        }
        for agent in self.agents.write().await.values_mut() {
            if agent.machine_id == Some(id) {
                agent.machine_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AgentRepository for MemoryStore {
    async fn upsert(&self, agent: &Agent) -> Result<()> {
        self.agents.write().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get(&self, id: AgentId) -> Result<Option<Agent>> {
        Ok(self.agents.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by_key(|a| a.id);
        Ok(agents)
    }

    async fn set_api_key_hash(&self, id: AgentId, hash: &str) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(&id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.api_key_hash = hash.to_string();
        Ok(())
    }

    async fn heartbeat(
        &self,
        id: AgentId,
        resources: &ResourceSample,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(&id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.resources = Some(resources.clone());
        agent.last_heartbeat_at = Some(at);
        Ok(())
    }

    async fn find_by_api_key_hash(&self, hash: &str) -> Result<Option<Agent>> {
        Ok(self
            .agents
            .read()
            .await
            .values()
            .find(|a| !a.api_key_hash.is_empty() && a.api_key_hash == hash)
            .cloned())
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, task: &Task) -> Result<TaskId> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(task.id)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_for_agent(
        &self,
        agent_id: AgentId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.agent_id == agent_id && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn claim_pending(&self, agent_id: AgentId, limit: usize) -> Result<Vec<Task>> {
        let mut tasks = self.tasks.write().await;

        let mut pending: Vec<&mut Task> = tasks
            .values_mut()
            .filter(|t| t.agent_id == agent_id && t.status == TaskStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut claimed = Vec::new();
        for task in pending.into_iter().take(limit) {
            task.transition(TaskStatus::Running)?;
            claimed.push(task.clone());
        }
        Ok(claimed)
    }

    async fn update(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or_else(|| Error::TaskNotFound(task.id.to_string()))?;
        if stored.status != task.status && !stored.status.can_transition_to(task.status) {
            return Err(Error::InvalidTransition {
                from: stored.status.to_string(),
                to: task.status.to_string(),
            });
        }
        *stored = task.clone();
        Ok(())
    }
}

#[async_trait]
impl ServerRepository for MemoryStore {
    async fn upsert(&self, server: &GameServerInstance) -> Result<()> {
        self.servers
            .write()
            .await
            .insert(server.server_id.clone(), server.clone());
        Ok(())
    }

    async fn get(&self, id: &ServerId) -> Result<Option<GameServerInstance>> {
        Ok(self.servers.read().await.get(id).cloned())
    }

    async fn list_for_agent(&self, agent_id: AgentId) -> Result<Vec<GameServerInstance>> {
        let mut servers: Vec<GameServerInstance> = self
            .servers
            .read()
            .await
            .values()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        Ok(servers)
    }

    async fn delete(&self, id: &ServerId) -> Result<()> {
        self.servers.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::task::TaskType;
    use serde_json::json;
    use std::sync::Arc;

    fn task(agent_id: AgentId) -> Task {
        Task::new(agent_id, TaskType::Stop, json!({"serverId": "s1"}), None)
    }

    #[tokio::test]
    async fn test_claim_moves_pending_to_running_once() {
        let store = MemoryStore::new();
        let agent = AgentId::new();
        let t = task(agent);
        TaskRepository::create(&store, &t).await.unwrap();

        let first = store.claim_pending(agent, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, TaskStatus::Running);
        assert!(first[0].started_at.is_some());

        assert!(store.claim_pending(agent, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_oldest_first_and_limited() {
        let store = MemoryStore::new();
        let agent = AgentId::new();
        let mut ids = Vec::new();
        for offset in 0..3 {
            let mut t = task(agent);
            t.created_at = Utc::now() - chrono::Duration::seconds(10 - offset);
            ids.push(t.id);
            TaskRepository::create(&store, &t).await.unwrap();
        }
        TaskRepository::create(&store, &task(AgentId::new()))
            .await
            .unwrap();

        let claimed = store.claim_pending(agent, 2).await.unwrap();
        let claimed_ids: Vec<TaskId> = claimed.iter().map(|t| t.id).collect();
        assert_eq!(claimed_ids, ids[..2]);
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_share_a_task() {
        let store = Arc::new(MemoryStore::new());
        let agent = AgentId::new();
        for _ in 0..50 {
            TaskRepository::create(store.as_ref(), &task(agent))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim_pending(agent, 4).await.unwrap()
            }));
        }
        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for handle in handles {
            for t in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(t.id), "task {} delivered twice", t.id);
            }
        }
        assert_eq!(total, 32);
    }

    #[tokio::test]
    async fn test_update_rejects_leaving_terminal_state() {
        let store = MemoryStore::new();
        let mut t = task(AgentId::new());
        TaskRepository::create(&store, &t).await.unwrap();
        t.transition(TaskStatus::Cancelled).unwrap();
        store.update(&t).await.unwrap();

        t.status = TaskStatus::Running;
        let err = store.update(&t).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_machine_delete_detaches_agents() {
        let store = MemoryStore::new();
        let machine = Machine {
            id: MachineId::new(),
            name: "eu-1".into(),
            address: "10.0.0.5".into(),
            ssh_credentials_ref: None,
            status: MachineStatus::Offline,
            created_at: Utc::now(),
            last_heartbeat_at: None,
        };
        MachineRepository::create(&store, &machine).await.unwrap();
        let agent = Agent {
            id: AgentId::new(),
            machine_id: Some(machine.id),
            hostname: None,
            agent_ip: "10.0.0.5".into(),
            version: "0.1.0".into(),
            capabilities: Default::default(),
            status: fleet_core::agent::AgentStatus::Online,
            api_key_hash: String::new(),
            resources: None,
            registered_at: Utc::now(),
            last_heartbeat_at: None,
        };
        AgentRepository::upsert(&store, &agent).await.unwrap();

        MachineRepository::delete(&store, machine.id).await.unwrap();
        let agent = AgentRepository::get(&store, agent.id).await.unwrap().unwrap();
        assert_eq!(agent.machine_id, None);
        assert!(matches!(
            MachineRepository::delete(&store, machine.id).await,
            Err(Error::MachineNotFound(_))
        ));
    }
}
