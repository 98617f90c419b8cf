pub mod adapter;
pub mod selfsigned;

pub use adapter::{AcmeClient, CertTool, IssuedCert, NginxController};

use crate::db::{Certificate, DbGateway, ProxyEntry};
use crate::domain;
use crate::error::{ProxyCtlError, Result};
use crate::lock::DistributedLock;
use crate::monitor::Alerter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateLifecycleStatus {
    Expired,
    ExpiringSoon,
    Valid,
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateView {
    pub id: String,
    pub domains: String,
    pub expires_at: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub status: CertificateLifecycleStatus,
    pub is_orphaned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainValidation {
    pub domain: String,
    pub valid: bool,
    pub message: String,
}

pub struct CertificateEngine {
    db: DbGateway,
    lock: Arc<DistributedLock>,
    acme: Arc<dyn AcmeClient>,
    cert_tool: Arc<dyn CertTool>,
    letsencrypt_dir: PathBuf,
    renew_before_days: i64,
    admin_email: Option<String>,
    is_development: bool,
    alerter: Arc<dyn Alerter>,
}

pub fn days_until_expiry(expires_at: DateTime<Utc>) -> i64 {
    let delta = expires_at - Utc::now();
    let secs = delta.num_seconds();
    (secs as f64 / 86_400.0).ceil() as i64
}

pub fn classify(expires_at: DateTime<Utc>, renew_before_days: i64) -> CertificateLifecycleStatus {
    let d = days_until_expiry(expires_at);
    if d < 0 {
        CertificateLifecycleStatus::Expired
    } else if d <= renew_before_days {
        CertificateLifecycleStatus::ExpiringSoon
    } else {
        CertificateLifecycleStatus::Valid
    }
}

impl CertificateEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DbGateway,
        lock: Arc<DistributedLock>,
        acme: Arc<dyn AcmeClient>,
        cert_tool: Arc<dyn CertTool>,
        letsencrypt_dir: PathBuf,
        renew_before_days: i64,
        admin_email: Option<String>,
        is_development: bool,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        CertificateEngine {
            db,
            lock,
            acme,
            cert_tool,
            letsencrypt_dir,
            renew_before_days,
            admin_email,
            is_development,
            alerter,
        }
    }

    fn live_dir(&self, primary: &str) -> PathBuf {
        self.letsencrypt_dir.join("live").join(primary)
    }

    pub async fn find_valid(&self, domains: &[String]) -> Result<Option<Certificate>> {
        let h = domain::hash(domains);
        self.db.find_valid_certificate(&h, self.renew_before_days).await
    }

    pub async fn get_valid(&self, domains: &[String]) -> Result<Option<Certificate>> {
        let cert = self.find_valid(domains).await?;
        if let Some(ref c) = cert {
            self.db.touch_certificate_last_used(&c.id).await?;
        }
        Ok(cert)
    }

    /// The central operation. Skipped entirely in development mode.
    pub async fn ensure_certificate(&self, domains: &[String]) -> Result<()> {
        if self.is_development {
            info!("certificate: ensure skipped, development mode, domains={:?}", domains);
            return Ok(());
        }
        if domains.is_empty() {
            return Err(ProxyCtlError::Validation("empty domain list".into()));
        }

        let primary = &domains[0];

        if let Some(existing) = self.find_valid(domains).await? {
            self.write_pems(primary, &existing.cert_pem, &existing.key_pem).await?;
            self.db.touch_certificate_last_used(&existing.id).await?;
            info!("certificate: reused existing cert, domains={:?}", domains);
            return Ok(());
        }

        // Leadership is acquired lazily, here, by the first guard that
        // needs it — not at startup. The advisory lock is session-scoped
        // and sticky: once acquired it is held until released or demoted,
        // not re-acquired per tick.
        if !self.lock.is_leader() && !self.lock.try_acquire_leader_lock().await {
            // Non-leader: return without producing a certificate rather
            // than blocking or polling (see Open Question resolution).
            info!(
                "certificate: not leader, skipping issuance, domains={:?}",
                domains
            );
            return Ok(());
        }

        let email = self.admin_email.as_deref().ok_or_else(|| {
            ProxyCtlError::Validation("ADMIN_EMAIL must be configured for issuance".into())
        })?;

        let issued = match self.acme.issue(domains, email).await {
            Ok(issued) => issued,
            Err(e) => {
                self.alerter.renewal_failure(domains, &e.to_string()).await;
                metrics::counter!("proxyctl_certificate_issuance_total", "result" => "error")
                    .increment(1);
                return Err(ProxyCtlError::Renewal {
                    domains: domains.to_vec(),
                    cause: e.to_string(),
                });
            }
        };

        let cert_pem = tokio::fs::read_to_string(&issued.cert_path).await?;
        let key_pem = tokio::fs::read_to_string(&issued.key_path).await?;

        let expires_at = self
            .cert_tool
            .read_not_after(&issued.cert_path)
            .await
            .unwrap_or_else(|e| {
                warn!("certificate: notAfter parse failed, defaulting to +90d: {}", e);
                Utc::now() + chrono::Duration::days(90)
            });

        let hash = domain::hash(domains);
        let id = uuid_like_id();
        self.db
            .insert_certificate(
                &id,
                &domain::join(domains),
                &hash,
                &cert_pem,
                &key_pem,
                Utc::now(),
                expires_at,
            )
            .await?;

        self.write_pems(primary, &cert_pem, &key_pem).await?;
        metrics::counter!("proxyctl_certificate_issuance_total", "result" => "ok").increment(1);
        info!("certificate: issued via acme, domains={:?}, expires_at={}", domains, expires_at);
        Ok(())
    }

    pub async fn upload_certificate(
        &self,
        domains: &[String],
        cert_pem: &str,
        key_pem: &str,
        chain_pem: Option<&str>,
    ) -> Result<Certificate> {
        if domains.is_empty() {
            return Err(ProxyCtlError::Validation("empty domain list".into()));
        }
        let primary = &domains[0];

        let tmp_dir = std::env::temp_dir().join(format!("proxyctl-upload-{}", uuid_like_id()));
        tokio::fs::create_dir_all(&tmp_dir).await?;
        let tmp_cert = tmp_dir.join("cert.pem");
        let tmp_key = tmp_dir.join("key.pem");
        tokio::fs::write(&tmp_cert, cert_pem).await?;
        tokio::fs::write(&tmp_key, key_pem).await?;

        let result = async {
            if !self.cert_tool.moduli_match(&tmp_cert, &tmp_key).await? {
                return Err(ProxyCtlError::Validation("cert/key modulus mismatch".into()));
            }
            let expires_at = self.cert_tool.read_not_after(&tmp_cert).await?;

            let full_chain = match chain_pem {
                Some(chain) => format!("{}\n{}", cert_pem, chain),
                None => cert_pem.to_string(),
            };

            let hash = domain::hash(domains);
            let id = uuid_like_id();
            let cert = self
                .db
                .insert_certificate(&id, &domain::join(domains), &hash, &full_chain, key_pem, Utc::now(), expires_at)
                .await?;

            self.write_pems(primary, &full_chain, key_pem).await?;
            Ok(cert)
        }
        .await;

        // Clean up temp files unconditionally.
        let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
        result
    }

    pub async fn generate_self_signed(&self, domains: &[String]) -> Result<Certificate> {
        if domains.is_empty() {
            return Err(ProxyCtlError::Validation("empty domain list".into()));
        }
        let primary = &domains[0];
        let (cert_pem, key_pem) = selfsigned::generate(domains, primary, 365)?;

        let hash = domain::hash(domains);
        let id = uuid_like_id();
        let expires_at = Utc::now() + chrono::Duration::days(365);
        let cert = self
            .db
            .insert_certificate(&id, &domain::join(domains), &hash, &cert_pem, &key_pem, Utc::now(), expires_at)
            .await?;

        self.write_pems(primary, &cert_pem, &key_pem).await?;
        Ok(cert)
    }

    /// Every `renewIntervalMs`, only while holding the leader lock. Errors
    /// per domain group are logged, never abort the sweep.
    pub async fn renewal_sweep(&self, entries: &[ProxyEntry], nginx: &dyn NginxController) -> Result<()> {
        if !self.lock.is_leader() && !self.lock.try_acquire_leader_lock().await {
            return Ok(());
        }

        let mut seen_joined: HashSet<String> = HashSet::new();
        for entry in entries {
            if !entry.ssl {
                continue;
            }
            let parsed = domain::parse(&entry.domains);
            if parsed.is_empty() {
                continue;
            }
            let joined = domain::join(&parsed);
            if !seen_joined.insert(joined) {
                continue;
            }
            if let Err(e) = self.ensure_certificate(&parsed).await {
                error!("certificate: renewal sweep group failed, domains={:?}, error={}", parsed, e);
            }
        }

        if let Err(e) = nginx.reload().await {
            error!("certificate: post-sweep reload failed, error={}", e);
        }
        Ok(())
    }

    /// Daily: recompute orphan status, delete expired rows, delete orphaned
    /// rows. Guarded by a short-lived named lock (distinct from the sticky
    /// `cluster:leader` lock) so that on a multi-node cluster only one node
    /// runs the sweep per tick; a node that loses the race just skips this
    /// tick rather than erroring the whole cleanup timer.
    pub async fn cleanup(&self, entries: &[ProxyEntry]) -> Result<()> {
        const CLEANUP_LOCK: &str = "cert:cleanup";

        let in_use_hashes: HashSet<String> = entries
            .iter()
            .filter(|e| e.ssl)
            .map(|e| domain::hash(&domain::parse(&e.domains)))
            .collect();

        let outcome = self
            .lock
            .with_lock(CLEANUP_LOCK, 2, std::time::Duration::from_secs(2), || async {
                for cert in self.db.list_certificates().await? {
                    let orphaned = !in_use_hashes.contains(&cert.domains_hash);
                    if orphaned != cert.is_orphaned {
                        self.db.set_orphaned(&cert.id, orphaned).await?;
                    }
                }

                let expired = self.db.delete_expired_certificates().await?;
                let orphaned = self.db.delete_orphaned_certificates().await?;
                info!("certificate: cleanup complete, expired={}, orphaned={}", expired, orphaned);
                Ok::<(), ProxyCtlError>(())
            })
            .await;

        match outcome {
            Some(result) => result,
            None => Err(ProxyCtlError::LockNotAcquired(CLEANUP_LOCK.to_string())),
        }
    }

    pub async fn list_with_status(&self) -> Result<Vec<CertificateView>> {
        let certs = self.db.list_certificates().await?;
        Ok(certs
            .into_iter()
            .map(|c| CertificateView {
                id: c.id,
                domains: c.domains,
                expires_at: c.expires_at,
                days_until_expiry: days_until_expiry(c.expires_at),
                status: classify(c.expires_at, self.renew_before_days),
                is_orphaned: c.is_orphaned,
            })
            .collect())
    }

    pub async fn validate_domain(&self, d: &str) -> DomainValidation {
        match tokio::net::lookup_host(format!("{}:0", d)).await {
            Ok(mut addrs) => {
                if addrs.next().is_some() {
                    DomainValidation {
                        domain: d.to_string(),
                        valid: true,
                        message: "resolved".to_string(),
                    }
                } else {
                    DomainValidation {
                        domain: d.to_string(),
                        valid: false,
                        message: "no addresses returned".to_string(),
                    }
                }
            }
            Err(e) => DomainValidation {
                domain: d.to_string(),
                valid: false,
                message: e.to_string(),
            },
        }
    }

    pub async fn delete_certificate(&self, id: &str) -> Result<()> {
        let cert = self.db.get_certificate(id).await?;
        let parsed = domain::parse(&cert.domains);
        if let Some(primary) = parsed.first() {
            let dir = self.live_dir(primary);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("certificate: best-effort dir removal failed, dir={:?}, error={}", dir, e);
            }
        }
        self.db.delete_certificate(id).await
    }

    async fn write_pems(&self, primary: &str, cert_pem: &str, key_pem: &str) -> Result<()> {
        let dir = self.live_dir(primary);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("fullchain.pem"), cert_pem).await?;
        tokio::fs::write(dir.join("privkey.pem"), key_pem).await?;
        Ok(())
    }
}

pub fn has_cert_on_disk(letsencrypt_dir: &Path, primary: &str) -> bool {
    let dir = letsencrypt_dir.join("live").join(primary);
    dir.join("fullchain.pem").exists() && dir.join("privkey.pem").exists()
}

fn uuid_like_id() -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let r: u64 = rand::random();
    format!("{:x}{:x}", now, r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_expired() {
        let past = Utc::now() - chrono::Duration::days(1);
        assert_eq!(classify(past, 30), CertificateLifecycleStatus::Expired);
    }

    #[test]
    fn classify_expiring_soon() {
        let soon = Utc::now() + chrono::Duration::days(10);
        assert_eq!(classify(soon, 30), CertificateLifecycleStatus::ExpiringSoon);
    }

    #[test]
    fn classify_valid() {
        let later = Utc::now() + chrono::Duration::days(90);
        assert_eq!(classify(later, 30), CertificateLifecycleStatus::Valid);
    }
}
