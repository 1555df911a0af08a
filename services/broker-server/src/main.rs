use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use broker_core::{Hub, OpenAuth, RingStorage, SimpleSisterManager, SisterCandidate, StandardDeduper};
use broker_server::{config, handshake_auth::OpenHandshakeAuth, state::AppState};
use clap::{Arg, Command};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let matches = Command::new("Broker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time pub/sub message broker with sister federation")
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to the broker's TOML config file")
                .value_name("PATH")
                .default_value(config::DEFAULT_CONFIG_PATH),
        )
        .get_matches();

    let config_path = PathBuf::from(matches.get_one::<String>("config").expect("has a default"));
    let cfg = match config::load_config_from_path(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(path = %config_path.display(), error = %err, "failed to load config");
            std::process::exit(1);
        }
    };

    if cfg.tls.is_some() {
        warn!("cert/key configured but this binary does not terminate TLS; binding plain HTTP (terminate TLS upstream)");
    }

    let deduper = Box::new(StandardDeduper::new(
        Duration::from_secs(cfg.deduper.tick_secs),
        Duration::from_secs(cfg.deduper.ttl_secs),
    ));
    let storage: Arc<dyn broker_core::Storage> = Arc::new(RingStorage::new(cfg.storage.limit));
    let auth: Arc<dyn broker_core::HubAuth> = Arc::new(OpenAuth);
    let sister_candidates = cfg
        .sisters
        .iter()
        .map(|s| SisterCandidate {
            url: s.url.clone(),
            headers: s.headers.clone(),
        })
        .collect();
    let sister_manager = Arc::new(SimpleSisterManager::new(sister_candidates));
    let sister_manager_dyn: Arc<dyn broker_core::SisterManager> = sister_manager.clone();

    let (hub, hub_handle) = Hub::new(Some(deduper), auth, Some(storage), None, Some(sister_manager_dyn));
    tokio::spawn(hub.run());
    broker_core::start_sister_manager(sister_manager, hub_handle.clone());

    let state = AppState::new(hub_handle, Arc::new(OpenHandshakeAuth));
    let router = broker_server::build_router(state);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "broker listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("broker shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
