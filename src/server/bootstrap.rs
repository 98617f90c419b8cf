use crate::certificate::adapter::{SubprocessAcmeClient, SubprocessCertTool, SubprocessNginxController};
use crate::certificate::CertificateEngine;
use crate::challenge::ChallengeStore;
use crate::cluster::{self, ClusterHeartbeat, ClusterTiming};
use crate::config::ProxyCtlConfig;
use crate::db::DbGateway;
use crate::fanout::FanoutReloader;
use crate::lock::DistributedLock;
use crate::monitor::{Alerter, CertificateMonitor, TracingAlerter};
use crate::reloader::Reloader;
use crate::server::{self, AppState};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: PathBuf,
    pub listen: String,
}

/// Control-plane lifecycle: init -> connect -> reconcile -> serve -> shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = ProxyCtlConfig::load(&args.config_path)?;

    let db = DbGateway::connect(&config.database_url).await?;

    let hostname = config.resolved_hostname();
    let instance_id = cluster::generate_instance_id(&hostname);
    let ip_address = local_ip_guess();

    let lock = Arc::new(DistributedLock::new(db.clone(), instance_id.clone()));
    let alerter: Arc<dyn Alerter> = Arc::new(TracingAlerter);

    let timing = ClusterTiming {
        heartbeat_ms: config.cluster_timing.heartbeat_ms,
        cleanup_ms: config.cluster_timing.cleanup_ms,
        stale_ms: config.cluster_timing.stale_ms,
        delete_ms: config.cluster_timing.delete_ms,
    };
    let cluster = Arc::new(ClusterHeartbeat::new(
        db.clone(),
        lock.clone(),
        instance_id.clone(),
        hostname.clone(),
        ip_address,
        timing,
        alerter.clone(),
    ));

    let challenges = Arc::new(ChallengeStore::new(db.clone()));

    let letsencrypt_dir = PathBuf::from(&config.paths.letsencrypt_dir);
    let acme = Arc::new(SubprocessAcmeClient::new(
        config.binaries.acme_client.clone(),
        letsencrypt_dir.clone(),
    ));
    let cert_tool = Arc::new(SubprocessCertTool::new(config.binaries.cert_tool.clone()));
    let nginx: Arc<dyn crate::certificate::NginxController> =
        Arc::new(SubprocessNginxController::new(config.binaries.nginx.clone()));

    let certs = Arc::new(CertificateEngine::new(
        db.clone(),
        lock.clone(),
        acme,
        cert_tool,
        letsencrypt_dir,
        config.renew_before_days,
        config.admin_email.clone(),
        config.is_development(),
        alerter.clone(),
    ));

    let monitor = Arc::new(CertificateMonitor::new(
        db.clone(),
        alerter.clone(),
        config.alert_threshold_days,
    ));

    let reloader = Arc::new(Reloader::new(db.clone(), certs.clone(), nginx.clone(), &config));
    let fanout = Arc::new(FanoutReloader::new(reloader.clone(), cluster.clone(), config.port));

    // Phase 1: one cleanup pass, register this node as active/non-leader.
    cluster.startup().await?;

    // Phase 2: synchronous initial reconciliation. A failure here is logged,
    // not fatal — the node still comes up and the next reload tick retries.
    let initial = reloader.reconcile().await;
    if !initial.ok {
        tracing::error!(
            "bootstrap: initial reconciliation failed, error={}",
            initial.error.unwrap_or_default()
        );
    } else {
        tracing::info!("bootstrap: initial reconciliation complete");
    }

    let state = AppState::new(
        config.clone(),
        db,
        lock,
        cluster.clone(),
        challenges,
        certs,
        monitor,
        reloader,
        fanout,
        nginx,
    );

    // Phase 3: long-lived timers, all wired to the shared shutdown signal.
    let shutdown = Arc::new(Notify::new());
    start_heartbeat_loop(&state, &shutdown);
    start_cleanup_loop(&state, &shutdown);
    start_renewal_loop(&state, &shutdown, config.renew_interval_ms);
    start_reload_loop(&state, &shutdown, config.reload_interval_ms);
    start_certificate_cleanup_loop(&state, &shutdown);
    start_monitor_loop(&state, &shutdown);

    // Phase 4: HTTP listener.
    tracing::info!("server: starting control plane, listen={}", args.listen);
    let http_handle = tokio::spawn({
        let listen = args.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_http_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = state.lock.release_leader_lock().await {
        tracing::error!("bootstrap: failed to release leader lock on shutdown, error={}", e);
    }
    if let Err(e) = state.cluster.shutdown().await {
        tracing::error!("bootstrap: cluster shutdown failed, error={}", e);
    }

    if let Err(e) = http_handle.await {
        tracing::error!("server: http task error: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

fn local_ip_guess() -> Option<String> {
    std::env::var("POD_IP").ok().or_else(|| std::env::var("HOST_IP").ok())
}

/// Time remaining until the next local `hour:minute:00`, today if it hasn't
/// passed yet, otherwise tomorrow.
fn duration_until_next_local(hour: u32, minute: u32) -> std::time::Duration {
    let now = chrono::Local::now();
    let today_target = now.date_naive().and_hms_opt(hour, minute, 0).expect("valid time");
    let target = if now.naive_local() < today_target {
        today_target
    } else {
        today_target + chrono::Duration::days(1)
    };
    (target - now.naive_local())
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(86_400))
}

/// Sleep for `duration`, but return `true` immediately if shutdown is signalled.
async fn sleep_or_shutdown(duration: std::time::Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.notified() => true,
    }
}

fn start_heartbeat_loop(state: &AppState, shutdown: &Arc<Notify>) {
    let cluster = state.cluster.clone();
    let shutdown = shutdown.clone();
    let interval = std::time::Duration::from_millis(cluster.timing().heartbeat_ms);

    tokio::spawn(async move {
        loop {
            if sleep_or_shutdown(interval, &shutdown).await {
                return;
            }
            if let Err(e) = cluster.heartbeat_tick().await {
                tracing::error!("cluster: heartbeat tick failed, error={}", e);
            }
        }
    });
}

fn start_cleanup_loop(state: &AppState, shutdown: &Arc<Notify>) {
    let cluster = state.cluster.clone();
    let shutdown = shutdown.clone();
    let interval = std::time::Duration::from_millis(cluster.timing().cleanup_ms);

    tokio::spawn(async move {
        loop {
            if sleep_or_shutdown(interval, &shutdown).await {
                return;
            }
            if let Err(e) = cluster.cleanup_tick().await {
                tracing::error!("cluster: cleanup tick failed, error={}", e);
            }
        }
    });
}

fn start_renewal_loop(state: &AppState, shutdown: &Arc<Notify>, interval_ms: u64) {
    let certs = state.certs.clone();
    let db = state.db.clone();
    let nginx = state.nginx.clone();
    let shutdown = shutdown.clone();
    let interval = std::time::Duration::from_millis(interval_ms);

    tokio::spawn(async move {
        loop {
            if sleep_or_shutdown(interval, &shutdown).await {
                return;
            }
            match db.list_proxy_entries().await {
                Ok(entries) => {
                    if let Err(e) = certs.renewal_sweep(&entries, nginx.as_ref()).await {
                        tracing::error!("certificate: renewal sweep failed, error={}", e);
                    }
                }
                Err(e) => tracing::error!("certificate: failed to list entries for renewal, error={}", e),
            }
        }
    });
}

fn start_reload_loop(state: &AppState, shutdown: &Arc<Notify>, interval_ms: u64) {
    let reloader = state.reloader.clone();
    let shutdown = shutdown.clone();
    let interval = std::time::Duration::from_millis(interval_ms);

    tokio::spawn(async move {
        loop {
            if sleep_or_shutdown(interval, &shutdown).await {
                return;
            }
            let outcome = reloader.reconcile().await;
            if !outcome.ok {
                tracing::error!("reloader: periodic reconciliation failed, error={:?}", outcome.error);
            }
        }
    });
}

/// Daily at local midnight: recompute orphan status, drop expired/orphaned
/// `Certificate` rows.
fn start_certificate_cleanup_loop(state: &AppState, shutdown: &Arc<Notify>) {
    let certs = state.certs.clone();
    let db = state.db.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        loop {
            if sleep_or_shutdown(duration_until_next_local(0, 0), &shutdown).await {
                return;
            }
            match db.list_proxy_entries().await {
                Ok(entries) => match certs.cleanup(&entries).await {
                    Ok(()) => {}
                    Err(crate::error::ProxyCtlError::LockNotAcquired(name)) => {
                        tracing::info!("certificate: cleanup: {} held by another node this tick", name);
                    }
                    Err(e) => tracing::error!("certificate: cleanup failed, error={}", e),
                },
                Err(e) => tracing::error!("certificate: failed to list entries for cleanup, error={}", e),
            }
        }
    });
}

/// Once 60s after startup, then daily at local 09:00.
fn start_monitor_loop(state: &AppState, shutdown: &Arc<Notify>) {
    let monitor = state.monitor.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        if sleep_or_shutdown(std::time::Duration::from_secs(60), &shutdown).await {
            return;
        }
        if let Err(e) = monitor.scan_once().await {
            tracing::error!("monitor: scan failed, error={}", e);
        }

        loop {
            if sleep_or_shutdown(duration_until_next_local(9, 0), &shutdown).await {
                return;
            }
            if let Err(e) = monitor.scan_once().await {
                tracing::error!("monitor: scan failed, error={}", e);
            }
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
