//! Lease-backed leader election.
//!
//! A [`LeaderElector`] owns a Kubernetes Lease and drives its
//! acquire/renew cycle, publishing leadership *transitions* over a watch
//! channel. A renewal failure while leading is treated as lost leadership:
//! the lease may lapse before the next attempt, and two instances writing
//! targets at once is worse than one standing down early.

use std::env;
use std::process;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

/// How long a held lease stays valid without renewal.
const LEASE_TTL: Duration = Duration::from_secs(30);

pub struct LeaderElector {
    lock: LeaseLock,
    lease_name: String,
}

impl LeaderElector {
    /// The lease lives in the client's default namespace; the holder id is
    /// the pod hostname, with a pid-based fallback outside a pod.
    pub fn new(client: Client, lease_name: impl Into<String>) -> Self {
        let lease_name = lease_name.into();
        let holder_id = env::var("HOSTNAME")
            .unwrap_or_else(|_| format!("trust-operator-{}", process::id()));
        let lock = LeaseLock::new(
            client.clone(),
            client.default_namespace(),
            LeaseLockParams {
                holder_id,
                lease_name: lease_name.clone(),
                lease_ttl: LEASE_TTL,
            },
        );
        Self { lock, lease_name }
    }

    /// Acquire and renew forever. Only transitions are published, so a
    /// receiver can block on `changed()` without seeing heartbeat noise.
    pub async fn run(self, leader_tx: watch::Sender<bool>) {
        let mut is_leader = false;
        loop {
            let now_leader = match self.lock.try_acquire_or_renew().await {
                Ok(result) => result.acquired_lease,
                Err(err) => {
                    warn!("failed to renew lease {:?}: {err}", self.lease_name);
                    false
                }
            };

            if now_leader != is_leader {
                is_leader = now_leader;
                info!("leadership on lease {:?} changed: leader={is_leader}", self.lease_name);
                let _ = leader_tx.send(is_leader);
            }

            // Renew well inside the ttl so one missed attempt does not
            // forfeit the lease.
            sleep(LEASE_TTL / 3).await;
        }
    }
}
