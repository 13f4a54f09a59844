//! Bounded readiness polling.

use fleet_core::{Error, Result};
use fleet_runtime::ServiceRuntime;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Probe a process inside an instance at a fixed interval, a bounded number
/// of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub attempts: u32,
    pub interval: Duration,
}

impl ReadinessProbe {
    /// After a fresh provision: up to two minutes.
    pub const PROVISION: ReadinessProbe = ReadinessProbe {
        attempts: 24,
        interval: Duration::from_secs(5),
    };

    /// After start or restart of an existing server.
    pub const START: ReadinessProbe = ReadinessProbe {
        attempts: 6,
        interval: Duration::from_secs(5),
    };

    /// Returns `Ok(true)` once `pgrep -f <process>` succeeds and `Ok(false)`
    /// when attempts run out. Probe errors count as "not ready yet".
    pub async fn wait(
        &self,
        runtime: &dyn ServiceRuntime,
        instance: &str,
        process: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        for attempt in 1..=self.attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }

            match runtime.exec(instance, &["pgrep", "-f", process]).await {
                Ok(output) if output.success() => {
                    info!(instance = %instance, attempt, "Game process is up");
                    return Ok(true);
                }
                Ok(_) => debug!(instance = %instance, attempt, "Game process not running yet"),
                Err(e) => debug!(instance = %instance, attempt, error = %e, "Readiness probe failed"),
            }
        }

        warn!(
            instance = %instance,
            attempts = self.attempts,
            "Game process not detected within readiness window"
        );
        Ok(false)
    }
}
