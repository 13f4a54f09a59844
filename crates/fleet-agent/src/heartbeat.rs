//! Heartbeat loop for periodic health reporting.

use crate::sampler::ResourceSampler;
use fleet_core::ids::AgentId;
use fleet_core::ports::ManagerApi;
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// Heartbeat service that periodically reports agent health.
pub struct HeartbeatService {
    agent_id: AgentId,
    manager: Arc<dyn ManagerApi>,
    interval: Duration,
    sampler: ResourceSampler,
}

impl HeartbeatService {
    pub fn new(agent_id: AgentId, manager: Arc<dyn ManagerApi>, interval: Duration) -> Self {
        Self {
            agent_id,
            manager,
            interval,
            sampler: ResourceSampler::new(),
        }
    }

    /// Run the heartbeat loop until shutdown. Failed heartbeats are logged
    /// and the loop carries on.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            agent_id = %self.agent_id,
            interval_secs = self.interval.as_secs(),
            "Starting heartbeat service"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Heartbeat service shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let span = fleet_trace::agent_span(&self.agent_id.to_string(), "heartbeat");
                    self.send_heartbeat().instrument(span).await;
                }
            }
        }
    }

    async fn send_heartbeat(&mut self) {
        let sample = self.sampler.sample();
        match self.manager.heartbeat(self.agent_id, &sample).await {
            Ok(()) => debug!(agent_id = %self.agent_id, "Heartbeat acknowledged"),
            Err(e) => warn!(agent_id = %self.agent_id, error = %e, "Failed to send heartbeat"),
        }
    }
}
