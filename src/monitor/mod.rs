pub mod alerter;

pub use alerter::{Alerter, TracingAlerter};

use crate::certificate::days_until_expiry;
use crate::db::DbGateway;
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub total: usize,
    pub expired: usize,
    pub expiring_soon: usize,
    pub valid: usize,
}

pub struct CertificateMonitor {
    db: DbGateway,
    alerter: Arc<dyn Alerter>,
    alert_threshold_days: i64,
}

impl CertificateMonitor {
    pub fn new(db: DbGateway, alerter: Arc<dyn Alerter>, alert_threshold_days: i64) -> Self {
        CertificateMonitor {
            db,
            alerter,
            alert_threshold_days,
        }
    }

    /// Scan all non-orphaned certs; emit `Expired`/`ExpiringSoon` to the
    /// Alerter as applicable.
    pub async fn scan_once(&self) -> Result<MonitorSummary> {
        let certs: Vec<_> = self
            .db
            .list_certificates()
            .await?
            .into_iter()
            .filter(|c| !c.is_orphaned)
            .collect();

        let mut summary = MonitorSummary {
            total: certs.len(),
            expired: 0,
            expiring_soon: 0,
            valid: 0,
        };

        for cert in &certs {
            let days_left = days_until_expiry(cert.expires_at);
            if days_left < 0 {
                summary.expired += 1;
                self.alerter.expired(&cert.id, &cert.domains).await;
            } else if days_left <= self.alert_threshold_days {
                summary.expiring_soon += 1;
                self.alerter
                    .expiring_soon(&cert.id, &cert.domains, days_left)
                    .await;
            } else {
                summary.valid += 1;
            }
        }

        Ok(summary)
    }

    pub async fn get_summary(&self) -> Result<MonitorSummary> {
        self.scan_once().await
    }
}
