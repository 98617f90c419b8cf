//! Cluster membership and leader election, backed by `DbGateway` rows and a
//! `DistributedLock`. The DB advisory lock is the source of truth for
//! leadership; `ClusterNode.is_leader` is a read-model projection refreshed
//! every heartbeat.

use crate::db::{ClusterNode, DbGateway, NodeStatus};
use crate::error::Result;
use crate::lock::{DistributedLock, LEADER_LOCK_NAME};
use crate::monitor::Alerter;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ClusterTiming {
    pub heartbeat_ms: u64,
    pub cleanup_ms: u64,
    pub stale_ms: u64,
    pub delete_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    pub active: i64,
    pub stale: i64,
    pub inactive: i64,
    pub leaders: Vec<String>,
    pub multiple_leaders: bool,
}

pub struct ClusterHeartbeat {
    db: DbGateway,
    lock: Arc<DistributedLock>,
    instance_id: String,
    hostname: String,
    ip_address: Option<String>,
    version: String,
    timing: ClusterTiming,
    alerter: Arc<dyn Alerter>,
}

/// `${hostname}-${startEpochMs}-${nonce}`.
pub fn generate_instance_id(hostname: &str) -> String {
    let start_epoch_ms = Utc::now().timestamp_millis();
    let nonce: u32 = rand::random();
    format!("{}-{}-{:08x}", hostname, start_epoch_ms, nonce)
}

impl ClusterHeartbeat {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DbGateway,
        lock: Arc<DistributedLock>,
        instance_id: String,
        hostname: String,
        ip_address: Option<String>,
        timing: ClusterTiming,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        ClusterHeartbeat {
            db,
            lock,
            instance_id,
            hostname,
            ip_address,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timing,
            alerter,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn timing(&self) -> &ClusterTiming {
        &self.timing
    }

    /// One cleanup pass, then upsert this node as active/non-leader.
    pub async fn startup(&self) -> Result<()> {
        self.cleanup_tick().await?;
        self.db
            .upsert_node(
                &self.instance_id,
                &self.hostname,
                self.ip_address.as_deref(),
                NodeStatus::Active.as_str(),
                false,
                &self.version,
                &serde_json::json!({}),
            )
            .await?;
        info!("cluster: startup complete, instance_id={}", self.instance_id);
        Ok(())
    }

    /// Read local `isLeader`; if true, verify no *other* active row also
    /// claims leadership. On conflict, release the leader lock immediately
    /// (split-brain defense) and re-read local state before upserting.
    pub async fn heartbeat_tick(&self) -> Result<()> {
        let mut is_leader = self.lock.is_leader();

        if is_leader {
            if let Some(conflict) = self.other_active_leader().await? {
                warn!(
                    "cluster: split-brain detected, releasing leader lock, other={}",
                    conflict
                );
                self.alerter
                    .split_brain_detected(&[self.instance_id.clone(), conflict])
                    .await;
                self.lock.release_leader_lock().await?;
                is_leader = self.lock.is_leader();
            }
        }

        self.db
            .upsert_node(
                &self.instance_id,
                &self.hostname,
                self.ip_address.as_deref(),
                NodeStatus::Active.as_str(),
                is_leader,
                &self.version,
                &serde_json::json!({}),
            )
            .await?;
        metrics::gauge!("proxyctl_cluster_is_leader").set(if is_leader { 1.0 } else { 0.0 });
        Ok(())
    }

    async fn other_active_leader(&self) -> Result<Option<String>> {
        let nodes = self.db.list_active_nodes().await?;
        Ok(nodes
            .into_iter()
            .find(|n| n.is_leader && n.instance_id != self.instance_id)
            .map(|n| n.instance_id))
    }

    /// Stale-flip active rows past `stale_ms`, enforce single leader, then
    /// delete stale/inactive rows past `delete_ms`.
    pub async fn cleanup_tick(&self) -> Result<()> {
        let stale_before = Utc::now() - ChronoDuration::milliseconds(self.timing.stale_ms as i64);
        let flipped = self.db.mark_stale_nodes(stale_before).await?;
        if flipped > 0 {
            info!("cluster: cleanup: flipped {} nodes to stale", flipped);
        }

        self.enforce_single_leader().await?;

        let delete_before = Utc::now() - ChronoDuration::milliseconds(self.timing.delete_ms as i64);
        let deleted = self.db.delete_old_nodes(delete_before).await?;
        if deleted > 0 {
            info!("cluster: cleanup: deleted {} stale/inactive nodes", deleted);
        }

        Ok(())
    }

    /// If more than one row claims `is_leader=true`, keep the greatest
    /// `last_heartbeat` and demote the rest.
    async fn enforce_single_leader(&self) -> Result<()> {
        let mut leaders: Vec<ClusterNode> = self
            .db
            .list_all_nodes()
            .await?
            .into_iter()
            .filter(|n| n.is_leader)
            .collect();

        if leaders.len() <= 1 {
            return Ok(());
        }

        leaders.sort_by_key(|n| n.last_heartbeat);
        leaders.pop(); // keep the most recent

        for n in &leaders {
            warn!("cluster: enforce_single_leader: demoting {}", n.instance_id);
            self.db.demote_node(&n.instance_id).await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        if self.lock.is_leader() {
            self.lock.release_leader_lock().await?;
        }
        self.db.mark_inactive(&self.instance_id).await?;
        info!("cluster: shutdown complete, instance_id={}", self.instance_id);
        Ok(())
    }

    // -- admin surface --------------------------------------------------

    pub async fn get_active_nodes(&self) -> Result<Vec<ClusterNode>> {
        self.db.list_active_nodes().await
    }

    pub async fn get_all_nodes(&self) -> Result<Vec<ClusterNode>> {
        self.db.list_all_nodes().await
    }

    pub async fn get_leader_node(&self) -> Result<Option<ClusterNode>> {
        Ok(self
            .db
            .list_active_nodes()
            .await?
            .into_iter()
            .find(|n| n.is_leader))
    }

    pub async fn get_stats(&self) -> Result<ClusterStats> {
        let nodes = self.db.list_all_nodes().await?;
        let mut active = 0i64;
        let mut stale = 0i64;
        let mut inactive = 0i64;
        let mut leaders = Vec::new();

        for n in &nodes {
            match n.node_status() {
                NodeStatus::Active => active += 1,
                NodeStatus::Stale => stale += 1,
                NodeStatus::Inactive => inactive += 1,
            }
            if n.is_leader {
                leaders.push(n.instance_id.clone());
            }
        }

        Ok(ClusterStats {
            active,
            stale,
            inactive,
            multiple_leaders: leaders.len() > 1,
            leaders,
        })
    }

    pub async fn manual_cleanup(&self) -> Result<()> {
        self.cleanup_tick().await
    }

    pub async fn manual_enforce_leader(&self) -> Result<()> {
        self.enforce_single_leader().await
    }

    /// If no active leader exists, attempt to become one.
    pub async fn ensure_leader_exists(&self) -> Result<bool> {
        if self.get_leader_node().await?.is_some() {
            return Ok(false);
        }
        Ok(self.try_become_leader().await)
    }

    pub async fn try_become_leader(&self) -> bool {
        self.lock.try_acquire(LEADER_LOCK_NAME).await
    }
}
