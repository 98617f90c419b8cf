//! Shared ACME HTTP-01 challenge store: any node can answer a challenge the
//! leader created on another node.

use crate::db::{AcmeChallenge, DbGateway};
use crate::error::Result;
use chrono::{Duration as ChronoDuration, Utc};

pub struct ChallengeStore {
    db: DbGateway,
}

impl ChallengeStore {
    pub fn new(db: DbGateway) -> Self {
        ChallengeStore { db }
    }

    pub async fn create(&self, token: &str, key_auth: &str, domain: &str, ttl_minutes: i64) -> Result<()> {
        let expires_at = Utc::now() + ChronoDuration::minutes(ttl_minutes);
        self.db.insert_challenge(token, key_auth, domain, expires_at).await
    }

    /// Lookup by token. Expired rows are deleted and reported as not-found
    /// by the gateway layer already; this just passes the result through.
    pub async fn lookup(&self, token: &str) -> Result<Option<AcmeChallenge>> {
        self.db.lookup_challenge(token).await
    }

    pub async fn complete(&self, token: &str) -> Result<()> {
        self.db.delete_challenge(token).await
    }

    pub async fn sweep_expired(&self) -> Result<u64> {
        self.db.delete_expired_challenges().await
    }
}
