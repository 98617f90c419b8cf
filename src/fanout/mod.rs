//! Broadcasts a reload trigger to every other known node after completing
//! the local reload. Peer calls are fire-and-forget: a peer that fails to
//! reload is logged, never propagated as an error to the caller, and a
//! broadcast reload never itself re-broadcasts.

use crate::cluster::ClusterHeartbeat;
use crate::reloader::{ReloadOutcome, Reloader};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PEER_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FanoutReloader {
    reloader: Arc<Reloader>,
    cluster: Arc<ClusterHeartbeat>,
    http: reqwest::Client,
    port: u16,
}

impl FanoutReloader {
    pub fn new(reloader: Arc<Reloader>, cluster: Arc<ClusterHeartbeat>, port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        FanoutReloader {
            reloader,
            cluster,
            http,
            port,
        }
    }

    /// Reload locally, then, if `broadcast` is set, fire the same reload at
    /// every other node with a known address. Always returns the *local*
    /// outcome; peer failures are logged only.
    pub async fn reload(&self, broadcast: bool) -> ReloadOutcome {
        let outcome = self.reloader.reconcile().await;

        if broadcast && outcome.ok {
            self.broadcast_to_peers().await;
        }

        outcome
    }

    async fn broadcast_to_peers(&self) {
        let nodes = match self.cluster.get_active_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("fanout: failed to list active nodes, error={}", e);
                return;
            }
        };

        let self_id = self.cluster.instance_id();
        let peers: Vec<(String, String)> = nodes
            .into_iter()
            .filter(|n| n.instance_id != self_id)
            .filter_map(|n| n.ip_address.map(|ip| (n.instance_id, ip)))
            .collect();

        if peers.is_empty() {
            return;
        }

        let futures = peers.into_iter().map(|(instance_id, ip)| {
            let client = self.http.clone();
            let url = format!("http://{}:{}/cluster/reload?broadcast=false", ip, self.port);
            async move {
                match client.post(&url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        info!("fanout: peer reload acknowledged, instance_id={}", instance_id);
                    }
                    Ok(resp) => {
                        warn!(
                            "fanout: peer reload returned non-success, instance_id={}, status={}",
                            instance_id,
                            resp.status()
                        );
                    }
                    Err(e) => {
                        warn!("fanout: peer reload request failed, instance_id={}, error={}", instance_id, e);
                    }
                }
            }
        });

        futures_util::future::join_all(futures).await;
    }
}
