use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External input, read-only to the core. Owned/mutated by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProxyEntry {
    pub id: String,
    pub domains: String,
    pub upstream: String,
    #[sqlx(rename = "entry_type")]
    pub entry_type: String, // "PROXY" | "REDIRECT"
    pub ssl: bool,
    pub nginx_custom_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProxyEntry {
    pub fn is_proxy(&self) -> bool {
        self.entry_type == "PROXY"
    }

    pub fn is_redirect(&self) -> bool {
        self.entry_type == "REDIRECT"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Certificate {
    pub id: String,
    pub domains: String,
    pub domains_hash: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub is_orphaned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Stale,
    Inactive,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Stale => "stale",
            NodeStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => NodeStatus::Active,
            "stale" => NodeStatus::Stale,
            _ => NodeStatus::Inactive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClusterNode {
    pub instance_id: String,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub status: String,
    pub is_leader: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub version: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClusterNode {
    pub fn node_status(&self) -> NodeStatus {
        NodeStatus::from_str(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AcmeChallenge {
    pub token: String,
    pub key_auth: String,
    pub domain: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
