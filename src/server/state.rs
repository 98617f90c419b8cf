use crate::certificate::{CertificateEngine, NginxController};
use crate::challenge::ChallengeStore;
use crate::cluster::ClusterHeartbeat;
use crate::config::ProxyCtlConfig;
use crate::db::DbGateway;
use crate::fanout::FanoutReloader;
use crate::lock::DistributedLock;
use crate::monitor::CertificateMonitor;
use crate::reloader::Reloader;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared application state, cheaply cloneable. Each field is its own
/// cohesive subsystem; handlers depend on the narrowest one they need.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<ProxyCtlConfig>>,
    pub db: DbGateway,
    pub lock: Arc<DistributedLock>,
    pub cluster: Arc<ClusterHeartbeat>,
    pub challenges: Arc<ChallengeStore>,
    pub certs: Arc<CertificateEngine>,
    pub monitor: Arc<CertificateMonitor>,
    pub reloader: Arc<Reloader>,
    pub fanout: Arc<FanoutReloader>,
    pub nginx: Arc<dyn NginxController>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProxyCtlConfig,
        db: DbGateway,
        lock: Arc<DistributedLock>,
        cluster: Arc<ClusterHeartbeat>,
        challenges: Arc<ChallengeStore>,
        certs: Arc<CertificateEngine>,
        monitor: Arc<CertificateMonitor>,
        reloader: Arc<Reloader>,
        fanout: Arc<FanoutReloader>,
        nginx: Arc<dyn NginxController>,
    ) -> Self {
        AppState {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            db,
            lock,
            cluster,
            challenges,
            certs,
            monitor,
            reloader,
            fanout,
            nginx,
        }
    }
}
