pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl ProxyCtlConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used — allowing the binary to start with zero configuration for
    /// local development.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: ProxyCtlConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            ProxyCtlConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded proxy-ctl configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("ADMIN_EMAIL") {
            self.admin_email = Some(v);
        }
        if let Ok(v) = std::env::var("RENEW_BEFORE_DAYS") {
            if let Ok(n) = v.parse::<i64>() {
                self.renew_before_days = n;
            }
        }
        if let Ok(v) = std::env::var("ALERT_THRESHOLD_DAYS") {
            if let Ok(n) = v.parse::<i64>() {
                self.alert_threshold_days = n;
            }
        }
        if let Ok(v) = std::env::var("NODE_ENV") {
            self.node_env = v;
        }
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.port = n;
            }
        }
        if let Ok(v) = std::env::var("HOSTNAME") {
            self.hostname = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL must be set");
        }
        if !self.is_development() && self.admin_email.is_none() {
            anyhow::bail!("ADMIN_EMAIL must be set in production");
        }
        if self.renew_before_days <= 0 {
            anyhow::bail!("renew_before_days must be positive");
        }
        if self.alert_threshold_days <= 0 {
            anyhow::bail!("alert_threshold_days must be positive");
        }
        Ok(())
    }

    /// Resolve the seed used for this node's `instanceId`: configured
    /// hostname, else the env var, else the OS hostname.
    pub fn resolved_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        })
    }
}
