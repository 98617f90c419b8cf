use serde::{Deserialize, Serialize};

fn default_node_env() -> String {
    "production".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_renew_before_days() -> i64 {
    30
}
fn default_alert_threshold_days() -> i64 {
    14
}
fn default_heartbeat_ms() -> u64 {
    30_000
}
fn default_cleanup_ms() -> u64 {
    45_000
}
fn default_stale_ms() -> u64 {
    120_000
}
fn default_delete_ms() -> u64 {
    3_600_000
}
fn default_renew_interval_ms() -> u64 {
    12 * 60 * 60 * 1000
}
fn default_reload_interval_ms() -> u64 {
    5 * 60 * 1000
}
fn default_nginx_dir() -> String {
    "/etc/nginx".to_string()
}
fn default_letsencrypt_dir() -> String {
    "/etc/letsencrypt".to_string()
}
fn default_certbot_webroot() -> String {
    "/var/www/certbot".to_string()
}
fn default_nginx_bin() -> String {
    "nginx".to_string()
}
fn default_acme_bin() -> String {
    "certbot".to_string()
}
fn default_cert_tool_bin() -> String {
    "openssl".to_string()
}

/// Timing knobs for the cluster heartbeat state machine, per node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTiming {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_cleanup_ms")]
    pub cleanup_ms: u64,
    #[serde(default = "default_stale_ms")]
    pub stale_ms: u64,
    #[serde(default = "default_delete_ms")]
    pub delete_ms: u64,
}

impl Default for ClusterTiming {
    fn default() -> Self {
        ClusterTiming {
            heartbeat_ms: default_heartbeat_ms(),
            cleanup_ms: default_cleanup_ms(),
            stale_ms: default_stale_ms(),
            delete_ms: default_delete_ms(),
        }
    }
}

/// On-disk locations owned by the reloader and certificate engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_nginx_dir")]
    pub nginx_dir: String,
    #[serde(default = "default_letsencrypt_dir")]
    pub letsencrypt_dir: String,
    #[serde(default = "default_certbot_webroot")]
    pub certbot_webroot: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            nginx_dir: default_nginx_dir(),
            letsencrypt_dir: default_letsencrypt_dir(),
            certbot_webroot: default_certbot_webroot(),
        }
    }
}

/// Executable names for the three subprocess adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinariesConfig {
    #[serde(default = "default_nginx_bin")]
    pub nginx: String,
    #[serde(default = "default_acme_bin")]
    pub acme_client: String,
    #[serde(default = "default_cert_tool_bin")]
    pub cert_tool: String,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        BinariesConfig {
            nginx: default_nginx_bin(),
            acme_client: default_acme_bin(),
            cert_tool: default_cert_tool_bin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCtlConfig {
    /// Shared coordinating store. Pool size is forced to 1 regardless of
    /// what is configured here — lock semantics require a single session.
    #[serde(default)]
    pub database_url: String,

    #[serde(default)]
    pub admin_email: Option<String>,

    #[serde(default = "default_renew_before_days")]
    pub renew_before_days: i64,

    #[serde(default = "default_alert_threshold_days")]
    pub alert_threshold_days: i64,

    #[serde(default = "default_node_env")]
    pub node_env: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seed for this node's `instanceId`. Falls back to the OS hostname.
    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub cluster_timing: ClusterTiming,

    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,

    #[serde(default = "default_reload_interval_ms")]
    pub reload_interval_ms: u64,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub binaries: BinariesConfig,
}

impl Default for ProxyCtlConfig {
    fn default() -> Self {
        ProxyCtlConfig {
            database_url: String::new(),
            admin_email: None,
            renew_before_days: default_renew_before_days(),
            alert_threshold_days: default_alert_threshold_days(),
            node_env: default_node_env(),
            port: default_port(),
            hostname: None,
            cluster_timing: ClusterTiming::default(),
            renew_interval_ms: default_renew_interval_ms(),
            reload_interval_ms: default_reload_interval_ms(),
            paths: PathsConfig::default(),
            binaries: BinariesConfig::default(),
        }
    }
}

impl ProxyCtlConfig {
    pub fn is_development(&self) -> bool {
        self.node_env == "development"
    }
}
