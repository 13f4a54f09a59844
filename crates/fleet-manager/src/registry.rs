//! Agent registry: registration, API keys, heartbeats and staleness.

use chrono::{DateTime, Duration, Utc};
use fleet_core::agent::{Agent, AgentStatus};
use fleet_core::api::{HeartbeatRequest, RegisterRequest, RegisterResponse};
use fleet_core::ids::AgentId;
use fleet_core::machine::Machine;
use fleet_core::ports::{AgentRepository, MachineRepository};
use fleet_core::{Error, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

const KEY_PREFIX: &str = "fk_";

/// Generate a fresh API key.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", KEY_PREFIX, hex::encode(bytes))
}

/// Digest stored in place of a key.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Compare two digests without short-circuiting on the first mismatch.
fn digests_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

pub struct AgentRegistry {
    agents: Arc<dyn AgentRepository>,
    machines: Arc<dyn MachineRepository>,
    enrollment_hash: Option<String>,
    heartbeat_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        machines: Arc<dyn MachineRepository>,
        enrollment_key: Option<&str>,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            agents,
            machines,
            enrollment_hash: enrollment_key.map(hash_api_key),
            heartbeat_timeout,
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Whether `key` is the enrollment key.
    pub fn is_enrollment_key(&self, key: &str) -> bool {
        self.enrollment_hash
            .as_deref()
            .is_some_and(|expected| digests_match(expected, &hash_api_key(key)))
    }

    /// The agent owning `key`, if any.
    pub async fn authenticate(&self, key: &str) -> Result<Option<Agent>> {
        self.agents.find_by_api_key_hash(&hash_api_key(key)).await
    }

    /// Register or refresh an agent, idempotent by agent id.
    ///
    /// An unknown agent must present the enrollment key and receives a newly
    /// issued key in the response. A known agent must present its current
    /// key and keeps it.
    pub async fn register(
        &self,
        request: &RegisterRequest,
        key: Option<&str>,
    ) -> Result<RegisterResponse> {
        let key = key.ok_or(Error::Unauthorized)?;
        let now = Utc::now();

        if let Some(machine_id) = request.machine_id {
            self.machines
                .get(machine_id)
                .await?
                .ok_or_else(|| Error::MachineNotFound(machine_id.to_string()))?;
        }

        match self.agents.get(request.agent_id).await? {
            Some(mut agent) => {
                if !digests_match(&agent.api_key_hash, &hash_api_key(key)) {
                    warn!(agent_id = %request.agent_id, "Re-registration with a stale key");
                    return Err(Error::Unauthorized);
                }
                agent.agent_ip = request.agent_ip.clone();
                agent.version = request.version.clone();
                agent.capabilities = request.capabilities;
                agent.hostname = request.hostname.clone().or(agent.hostname);
                agent.machine_id = request.machine_id.or(agent.machine_id);
                agent.status = AgentStatus::Online;
                agent.last_heartbeat_at = Some(now);
                self.agents.upsert(&agent).await?;

                info!(agent_id = %agent.id, agent_ip = %agent.agent_ip, "Agent re-registered");
                Ok(RegisterResponse {
                    agent_id: agent.id,
                    status: agent.status,
                    api_key: None,
                    registered_at: agent.registered_at,
                })
            }
            None => {
                if !self.is_enrollment_key(key) {
                    return Err(Error::Unauthorized);
                }
                let api_key = generate_api_key();
                let agent = Agent {
                    id: request.agent_id,
                    machine_id: request.machine_id,
                    hostname: request.hostname.clone(),
                    agent_ip: request.agent_ip.clone(),
                    version: request.version.clone(),
                    capabilities: request.capabilities,
                    status: AgentStatus::Online,
                    api_key_hash: hash_api_key(&api_key),
                    resources: None,
                    registered_at: now,
                    last_heartbeat_at: Some(now),
                };
                self.agents.upsert(&agent).await?;

                info!(
                    agent_id = %agent.id,
                    agent_ip = %agent.agent_ip,
                    version = %agent.version,
                    "Agent enrolled"
                );
                Ok(RegisterResponse {
                    agent_id: agent.id,
                    status: agent.status,
                    api_key: Some(api_key),
                    registered_at: now,
                })
            }
        }
    }

    /// Record a heartbeat. The agent's machine, if bound, is touched too.
    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<()> {
        let agent_id = request.agent_id;
        let now = Utc::now();
        let mut agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;

        self.agents
            .heartbeat(agent_id, &request.resources, now)
            .await?;
        if agent.status != request.status {
            agent.status = request.status;
            agent.resources = Some(request.resources.clone());
            agent.last_heartbeat_at = Some(now);
            self.agents.upsert(&agent).await?;
        }

        if let Some(machine_id) = agent.machine_id {
            if let Err(e) = self.machines.touch(machine_id, now).await {
                warn!(agent_id = %agent_id, machine_id = %machine_id, error = %e, "Failed to touch machine");
            }
        }
        Ok(())
    }

    /// Issue a new key. The previous key stops working immediately.
    pub async fn regenerate_key(&self, agent_id: AgentId) -> Result<String> {
        let api_key = generate_api_key();
        self.agents
            .set_api_key_hash(agent_id, &hash_api_key(&api_key))
            .await?;
        info!(agent_id = %agent_id, "API key regenerated");
        Ok(api_key)
    }

    /// All agents with staleness applied as of `now`.
    pub async fn list(&self, now: DateTime<Utc>) -> Result<Vec<Agent>> {
        let mut agents = self.agents.list().await?;
        for agent in &mut agents {
            agent.status = agent.effective_status(now, self.heartbeat_timeout);
        }
        Ok(agents)
    }

    pub async fn get(&self, agent_id: AgentId) -> Result<Agent> {
        let mut agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        agent.status = agent.effective_status(Utc::now(), self.heartbeat_timeout);
        Ok(agent)
    }

    /// All machines with staleness applied as of `now`.
    pub async fn machines(&self, now: DateTime<Utc>) -> Result<Vec<Machine>> {
        let mut machines = self.machines.list().await?;
        for machine in &mut machines {
            machine.status = machine.effective_status(now, self.heartbeat_timeout);
        }
        Ok(machines)
    }
}
