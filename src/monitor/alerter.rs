//! Notification delivery (email/webhook) is an external collaborator; this
//! crate only specifies the trait boundary and emits the four event types
//! into it. The default implementation logs via `tracing` — wiring a real
//! transport is the consuming deployment's job.

use async_trait::async_trait;

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn expired(&self, cert_id: &str, domains: &str);
    async fn expiring_soon(&self, cert_id: &str, domains: &str, days_left: i64);
    async fn renewal_failure(&self, domains: &[String], cause: &str);
    async fn split_brain_detected(&self, leader_instance_ids: &[String]);
}

pub struct TracingAlerter;

#[async_trait]
impl Alerter for TracingAlerter {
    async fn expired(&self, cert_id: &str, domains: &str) {
        tracing::warn!("alert: certificate expired, id={}, domains={}", cert_id, domains);
    }

    async fn expiring_soon(&self, cert_id: &str, domains: &str, days_left: i64) {
        tracing::warn!(
            "alert: certificate expiring soon, id={}, domains={}, days_left={}",
            cert_id,
            domains,
            days_left
        );
    }

    async fn renewal_failure(&self, domains: &[String], cause: &str) {
        tracing::error!("alert: renewal failure, domains={:?}, cause={}", domains, cause);
    }

    async fn split_brain_detected(&self, leader_instance_ids: &[String]) {
        tracing::error!("alert: split brain detected, leaders={:?}", leader_instance_ids);
    }
}
