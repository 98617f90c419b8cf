pub mod models;

pub use models::*;

use crate::error::{ProxyCtlError, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Typed access to the four coordinating entities plus the two advisory-lock
/// primitives everything else in the crate builds on.
///
/// A single connection per process is mandated by the locking model (session-
/// scoped advisory locks); `max_connections` is forced to 1 regardless of what
/// is configured upstream.
#[derive(Clone)]
pub struct DbGateway {
    pool: PgPool,
}

impl DbGateway {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect(database_url)
            .await?;
        info!("db: connected, pool_size=1");
        Ok(DbGateway { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // -- advisory lock primitives --------------------------------------

    /// Non-blocking, session-scoped advisory lock. A session that dies
    /// releases its locks automatically.
    pub async fn try_advisory_lock(&self, lock_id: i64) -> Result<bool> {
        with_retry(|| async {
            let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS acquired")
                .bind(lock_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(row.try_get::<bool, _>("acquired")?)
        })
        .await
    }

    /// Idempotent: releasing a lock not held by this session is a no-op
    /// (postgres returns false, which we swallow).
    pub async fn release_advisory_lock(&self, lock_id: i64) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(lock_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    // -- ProxyEntry (read-only passthrough; owned by the external admin API) --

    pub async fn list_proxy_entries(&self) -> Result<Vec<ProxyEntry>> {
        let rows = sqlx::query_as::<_, ProxyEntry>(
            "SELECT id, domains, upstream, entry_type, ssl, nginx_custom_code, created_at, updated_at
             FROM proxy_entries ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Certificate ------------------------------------------------------

    pub async fn find_valid_certificate(
        &self,
        domains_hash: &str,
        renew_before_days: i64,
    ) -> Result<Option<Certificate>> {
        let row = sqlx::query_as::<_, Certificate>(
            "SELECT id, domains, domains_hash, cert_pem, key_pem, issued_at, expires_at,
                    last_used_at, is_orphaned, created_at, updated_at
             FROM certificates
             WHERE domains_hash = $1 AND is_orphaned = false
               AND expires_at > now() + make_interval(days => $2)
             ORDER BY expires_at DESC
             LIMIT 1",
        )
        .bind(domains_hash)
        .bind(renew_before_days as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn touch_certificate_last_used(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE certificates SET last_used_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_certificate(
        &self,
        id: &str,
        domains: &str,
        domains_hash: &str,
        cert_pem: &str,
        key_pem: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Certificate> {
        with_retry(|| async {
            let row = sqlx::query_as::<_, Certificate>(
                "INSERT INTO certificates
                    (id, domains, domains_hash, cert_pem, key_pem, issued_at, expires_at,
                     last_used_at, is_orphaned, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, now(), false, now(), now())
                 RETURNING id, domains, domains_hash, cert_pem, key_pem, issued_at, expires_at,
                           last_used_at, is_orphaned, created_at, updated_at",
            )
            .bind(id)
            .bind(domains)
            .bind(domains_hash)
            .bind(cert_pem)
            .bind(key_pem)
            .bind(issued_at)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        })
        .await
    }

    pub async fn list_certificates(&self) -> Result<Vec<Certificate>> {
        let rows = sqlx::query_as::<_, Certificate>(
            "SELECT id, domains, domains_hash, cert_pem, key_pem, issued_at, expires_at,
                    last_used_at, is_orphaned, created_at, updated_at
             FROM certificates ORDER BY expires_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_certificate(&self, id: &str) -> Result<Certificate> {
        sqlx::query_as::<_, Certificate>(
            "SELECT id, domains, domains_hash, cert_pem, key_pem, issued_at, expires_at,
                    last_used_at, is_orphaned, created_at, updated_at
             FROM certificates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ProxyCtlError::NotFound(format!("certificate {}", id)))
    }

    pub async fn delete_certificate(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM certificates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_orphaned(&self, id: &str, is_orphaned: bool) -> Result<()> {
        sqlx::query("UPDATE certificates SET is_orphaned = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(is_orphaned)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_expired_certificates(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM certificates WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn delete_orphaned_certificates(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM certificates WHERE is_orphaned = true")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    // -- ClusterNode --------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_node(
        &self,
        instance_id: &str,
        hostname: &str,
        ip_address: Option<&str>,
        status: &str,
        is_leader: bool,
        version: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO cluster_nodes
                (instance_id, hostname, ip_address, status, is_leader, last_heartbeat,
                 version, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, now(), $6, $7, now(), now())
             ON CONFLICT (instance_id) DO UPDATE SET
                hostname = EXCLUDED.hostname,
                ip_address = EXCLUDED.ip_address,
                status = EXCLUDED.status,
                is_leader = EXCLUDED.is_leader,
                last_heartbeat = now(),
                version = EXCLUDED.version,
                metadata = EXCLUDED.metadata,
                updated_at = now()",
        )
        .bind(instance_id)
        .bind(hostname)
        .bind(ip_address)
        .bind(status)
        .bind(is_leader)
        .bind(version)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_node(&self, instance_id: &str) -> Result<Option<ClusterNode>> {
        let row = sqlx::query_as::<_, ClusterNode>(
            "SELECT instance_id, hostname, ip_address, status, is_leader, last_heartbeat,
                    version, metadata, created_at, updated_at
             FROM cluster_nodes WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_active_nodes(&self) -> Result<Vec<ClusterNode>> {
        let rows = sqlx::query_as::<_, ClusterNode>(
            "SELECT instance_id, hostname, ip_address, status, is_leader, last_heartbeat,
                    version, metadata, created_at, updated_at
             FROM cluster_nodes WHERE status = 'active' ORDER BY instance_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_all_nodes(&self) -> Result<Vec<ClusterNode>> {
        let rows = sqlx::query_as::<_, ClusterNode>(
            "SELECT instance_id, hostname, ip_address, status, is_leader, last_heartbeat,
                    version, metadata, created_at, updated_at
             FROM cluster_nodes ORDER BY instance_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn demote_node(&self, instance_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cluster_nodes SET is_leader = false, updated_at = now() WHERE instance_id = $1",
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_stale_nodes(&self, stale_before: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE cluster_nodes SET status = 'stale', is_leader = false, updated_at = now()
             WHERE status = 'active' AND last_heartbeat < $1",
        )
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn delete_old_nodes(&self, delete_before: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            "DELETE FROM cluster_nodes
             WHERE status IN ('stale', 'inactive') AND last_heartbeat < $1",
        )
        .bind(delete_before)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn count_active_leaders(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT count(*) AS n FROM cluster_nodes WHERE is_leader = true AND status = 'active'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    pub async fn mark_inactive(&self, instance_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cluster_nodes SET status = 'inactive', is_leader = false,
                 last_heartbeat = now(), updated_at = now()
             WHERE instance_id = $1",
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- AcmeChallenge --------------------------------------------------------

    pub async fn insert_challenge(
        &self,
        token: &str,
        key_auth: &str,
        domain: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO acme_challenges (token, key_auth, domain, expires_at, created_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (token) DO UPDATE SET
                key_auth = EXCLUDED.key_auth, domain = EXCLUDED.domain, expires_at = EXCLUDED.expires_at",
        )
        .bind(token)
        .bind(key_auth)
        .bind(domain)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Lookup by token. Past expiry: delete and report not-found.
    pub async fn lookup_challenge(&self, token: &str) -> Result<Option<AcmeChallenge>> {
        let row = sqlx::query_as::<_, AcmeChallenge>(
            "SELECT token, key_auth, domain, expires_at, created_at
             FROM acme_challenges WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(c) if c.expires_at <= Utc::now() => {
                self.delete_challenge(token).await?;
                warn!("acme_challenge: lookup past expiry, token={}", token);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub async fn delete_challenge(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM acme_challenges WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_expired_challenges(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM acme_challenges WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

/// Retry transient DB errors (connection drop, serialization failure) up to
/// 3 times with a 1 s fixed delay, per the transient-DB-error policy.
async fn with_retry<F, Fut, T>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(ProxyCtlError::TransientDb(msg)) if attempt < 3 => {
                attempt += 1;
                warn!("db: transient error, retrying ({}/3): {}", attempt, msg);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
