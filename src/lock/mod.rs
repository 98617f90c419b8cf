//! Named, non-reentrant advisory locks on top of `DbGateway`, plus leader
//! lock bookkeeping. The per-process map of held locks is a constructed
//! collaborator (not a global singleton) so tests can build independent
//! instances.

use crate::db::DbGateway;
use crate::error::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

pub const LEADER_LOCK_NAME: &str = "cluster:leader";

#[derive(Debug, Clone)]
struct HeldLock {
    lock_id: i64,
    acquired_at: DateTime<Utc>,
}

pub struct DistributedLock {
    db: DbGateway,
    instance_id: String,
    held: DashMap<String, HeldLock>,
}

impl DistributedLock {
    pub fn new(db: DbGateway, instance_id: String) -> Self {
        DistributedLock {
            db,
            instance_id,
            held: DashMap::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Single attempt, no retry. DB errors are treated conservatively as
    /// "not acquired" rather than propagated.
    pub async fn try_acquire(&self, name: &str) -> bool {
        let lock_id = lock_id_from_name(name);
        match self.db.try_advisory_lock(lock_id).await {
            Ok(true) => {
                self.held.insert(
                    name.to_string(),
                    HeldLock {
                        lock_id,
                        acquired_at: Utc::now(),
                    },
                );
                info!("lock: acquired, name={}, lock_id={}", name, lock_id);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("lock: try_acquire db error, name={}, error={}", name, e);
                false
            }
        }
    }

    /// Idempotent: warns (does not error) if the name was not held.
    pub async fn release(&self, name: &str) -> Result<()> {
        let Some((_, held)) = self.held.remove(name) else {
            warn!("lock: release of unheld lock, name={}", name);
            return Ok(());
        };
        self.db.release_advisory_lock(held.lock_id).await?;
        info!("lock: released, name={}", name);
        Ok(())
    }

    /// Pure local check — never attempts to acquire.
    pub fn is_leader(&self) -> bool {
        self.held.contains_key(LEADER_LOCK_NAME)
    }

    pub async fn try_acquire_leader_lock(&self) -> bool {
        self.try_acquire(LEADER_LOCK_NAME).await
    }

    pub async fn release_leader_lock(&self) -> Result<()> {
        self.release(LEADER_LOCK_NAME).await
    }

    /// Retry `try_acquire` up to `retries` times with a fixed delay, run
    /// `fn`, then release on every exit path (success, failure). Returns
    /// `None` — the "not-acquired" sentinel — if the lock was never
    /// obtained.
    pub async fn with_lock<F, Fut, T>(
        &self,
        name: &str,
        retries: u32,
        delay: std::time::Duration,
        f: F,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let mut acquired = false;
        for attempt in 0..=retries {
            if self.try_acquire(name).await {
                acquired = true;
                break;
            }
            if attempt < retries {
                tokio::time::sleep(delay).await;
            }
        }

        if !acquired {
            warn!("lock: with_lock exhausted retries, name={}", name);
            return None;
        }

        let result = f().await;
        if let Err(e) = self.release(name).await {
            warn!("lock: release after with_lock failed, name={}, error={}", name, e);
        }
        Some(result)
    }
}

/// FNV-1a fold to a positive 32-bit integer, used to derive a stable
/// advisory-lock id from a human-readable name.
fn lock_id_from_name(name: &str) -> i64 {
    const FNV_OFFSET: u32 = 2_166_136_261;
    const FNV_PRIME: u32 = 16_777_619;
    let mut hash = FNV_OFFSET;
    for b in name.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash & 0x7fff_ffff) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_id_is_stable_and_positive() {
        let a = lock_id_from_name("cluster:leader");
        let b = lock_id_from_name("cluster:leader");
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn lock_id_differs_by_name() {
        assert_ne!(
            lock_id_from_name("cluster:leader"),
            lock_id_from_name("cert:renew")
        );
    }
}
