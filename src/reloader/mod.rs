//! The on-node reconciliation driver: filesystem reset, HTTP-only pass,
//! leader-gated certificate issuance, final TLS-aware pass. Serialized on a
//! local mutex so two reloads never race each other on the same node.

use crate::certificate::{self, CertificateEngine, NginxController};
use crate::config::ProxyCtlConfig;
use crate::db::{DbGateway, ProxyEntry};
use crate::error::Result;
use crate::nginxgen::{self, assets, Probes};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ReloadOutcome {
    pub ok: bool,
    pub error: Option<String>,
}

impl ReloadOutcome {
    fn ok() -> Self {
        ReloadOutcome { ok: true, error: None }
    }

    fn err(msg: impl Into<String>) -> Self {
        ReloadOutcome {
            ok: false,
            error: Some(msg.into()),
        }
    }
}

pub struct Reloader {
    db: DbGateway,
    certs: Arc<CertificateEngine>,
    nginx: Arc<dyn NginxController>,
    nginx_dir: PathBuf,
    letsencrypt_dir: PathBuf,
    admin_port: u16,
    mu: Mutex<()>,
}

impl Reloader {
    pub fn new(
        db: DbGateway,
        certs: Arc<CertificateEngine>,
        nginx: Arc<dyn NginxController>,
        config: &ProxyCtlConfig,
    ) -> Self {
        Reloader {
            db,
            certs,
            nginx,
            nginx_dir: PathBuf::from(&config.paths.nginx_dir),
            letsencrypt_dir: PathBuf::from(&config.paths.letsencrypt_dir),
            admin_port: config.port,
            mu: Mutex::new(()),
        }
    }

    /// Full reconciliation: reset -> HTTP-only render/validate/reload ->
    /// leader-gated issuance -> final render/validate/reload. Holds the
    /// local mutex for its entire duration.
    pub async fn reconcile(&self) -> ReloadOutcome {
        let _guard = self.mu.lock().await;
        match self.reconcile_inner().await {
            Ok(()) => {
                metrics::counter!("proxyctl_reconcile_total", "result" => "ok").increment(1);
                ReloadOutcome::ok()
            }
            Err(e) => {
                metrics::counter!("proxyctl_reconcile_total", "result" => "error").increment(1);
                error!("reloader: reconciliation failed, error={}", e);
                ReloadOutcome::err(e.to_string())
            }
        }
    }

    async fn reconcile_inner(&self) -> Result<()> {
        self.reset_filesystem().await?;

        let entries = self.db.list_proxy_entries().await?;

        self.render_pass(&entries, false).await?;
        self.nginx.validate().await?;
        self.nginx.reload().await?;
        info!("reloader: phase 1 (http-only) reload complete, entries={}", entries.len());

        for entry in entries.iter().filter(|e| e.ssl) {
            let domains = crate::domain::parse(&entry.domains);
            if domains.is_empty() {
                continue;
            }
            if let Err(e) = self.certs.ensure_certificate(&domains).await {
                error!(
                    "reloader: certificate issuance failed for entry, id={}, domains={:?}, error={}",
                    entry.id, domains, e
                );
            }
        }

        self.render_pass(&entries, true).await?;
        self.nginx.validate().await?;
        self.nginx.reload().await?;
        info!("reloader: phase 3 (final) reload complete");

        Ok(())
    }

    /// Phase 0: recursively clear the managed nginx directory, re-extract
    /// the embedded base template tree, and ensure the log + custom-code
    /// directories a proxy entry's `nginx_custom_code` might reference
    /// exist. `ssl/dhparam.pem` is operator-provided and optional; it is
    /// backed up before the wipe and restored after extraction rather than
    /// destroyed on every reload.
    async fn reset_filesystem(&self) -> Result<()> {
        let dhparam_path = self.nginx_dir.join("ssl").join("dhparam.pem");
        let dhparam = tokio::fs::read(&dhparam_path).await.ok();

        if self.nginx_dir.exists() {
            let mut entries = tokio::fs::read_dir(&self.nginx_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    tokio::fs::remove_dir_all(&path).await?;
                } else {
                    tokio::fs::remove_file(&path).await?;
                }
            }
        } else {
            tokio::fs::create_dir_all(&self.nginx_dir).await?;
        }

        assets::extract_to(&self.nginx_dir).await?;

        if let Some(bytes) = dhparam {
            tokio::fs::write(&dhparam_path, bytes).await?;
        }

        tokio::fs::create_dir_all("/var/log/nginx").await?;

        let entries = self.db.list_proxy_entries().await?;
        for dir in custom_code_directories(&entries) {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                warn!("reloader: failed to create custom-code directory, dir={:?}, error={}", dir, e);
            }
        }
        Ok(())
    }

    /// Render every entry's `conf.d/<id>.conf`. `with_certs` controls
    /// whether the cert-present probe is allowed to answer true; the
    /// HTTP-only pass always forces it false so phase 1 never references a
    /// certificate file that has not been written to disk yet.
    async fn render_pass(&self, entries: &[ProxyEntry], with_certs: bool) -> Result<()> {
        let conf_d = self.nginx_dir.join("conf.d");
        tokio::fs::create_dir_all(&conf_d).await?;

        for entry in entries {
            let letsencrypt_dir = self.letsencrypt_dir.to_string_lossy().to_string();
            let has_cert_probe = |primary: &str| -> bool {
                with_certs && certificate::has_cert_on_disk(&self.letsencrypt_dir, primary)
            };
            let upstream_resolvable_probe = |upstream: &str| -> bool { upstream_host_resolvable(upstream) };
            let probes = Probes {
                has_cert: &has_cert_probe,
                upstream_resolvable: &upstream_resolvable_probe,
            };

            let Some(rendered) = nginxgen::render_entry(entry, &letsencrypt_dir, self.admin_port, &probes) else {
                continue;
            };

            let tmp_path = conf_d.join(format!("{}.conf.tmp", entry.id));
            let final_path = conf_d.join(format!("{}.conf", entry.id));
            tokio::fs::write(&tmp_path, rendered).await?;
            tokio::fs::rename(&tmp_path, &final_path).await?;
        }
        Ok(())
    }
}

/// Best-effort sync DNS/host check used for the upstream-resolvable probe.
/// Uses `std::net::ToSocketAddrs`, which performs a blocking resolver call;
/// acceptable here since this only runs during the (already serialized,
/// already async-context) reload pass, not on the request hot path.
fn upstream_host_resolvable(upstream: &str) -> bool {
    let host = upstream
        .split("://")
        .last()
        .unwrap_or(upstream)
        .split('/')
        .next()
        .unwrap_or(upstream);
    let host_port = if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:0", host)
    };
    use std::net::ToSocketAddrs;
    host_port.to_socket_addrs().map(|mut a| a.next().is_some()).unwrap_or(false)
}

/// Scan `nginx_custom_code` for `root`/`alias` directives and return the
/// directories they reference, so phase 0 can create them before nginx is
/// asked to validate a config that points at them.
fn custom_code_directories(entries: &[ProxyEntry]) -> Vec<PathBuf> {
    let re = Regex::new(r"(?:root|alias)\s+([^\s;]+);").expect("static regex is valid");
    entries
        .iter()
        .filter_map(|e| e.nginx_custom_code.as_deref())
        .flat_map(|code| re.captures_iter(code).map(|c| PathBuf::from(c[1].to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: &str, custom: Option<&str>) -> ProxyEntry {
        let now = Utc::now();
        ProxyEntry {
            id: id.into(),
            domains: "example.com".into(),
            upstream: "app:8080".into(),
            entry_type: "PROXY".into(),
            ssl: false,
            nginx_custom_code: custom.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn custom_code_directories_extracts_root_and_alias() {
        let entries = vec![
            entry("e1", Some("root /var/www/static;")),
            entry("e2", Some("alias /srv/assets/;")),
            entry("e3", None),
        ];
        let dirs = custom_code_directories(&entries);
        assert_eq!(dirs.len(), 2);
        assert!(dirs.contains(&PathBuf::from("/var/www/static")));
        assert!(dirs.contains(&PathBuf::from("/srv/assets/")));
    }

    #[test]
    fn custom_code_directories_empty_when_no_custom_code() {
        let entries = vec![entry("e1", None)];
        assert!(custom_code_directories(&entries).is_empty());
    }
}
