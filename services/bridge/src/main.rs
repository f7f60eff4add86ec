//! bridge: a bidirectional chat bridge between platform A's self-hosted
//! WebSocket protocol and platform B's cloud long-poll bot API.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bridge::conn::poll_b::PollBConnection;
use bridge::conn::ws_a::WsAConnection;
use bridge::conn::{ConnectionManager, PeerSender, RouterEvent};
use bridge::forwarder::Forwarder;
use bridge::retry_queue::RetryQueueHandle;
use bridge::router::EventRouter;
use bridge::status_http::{BridgeStatus, StatusServer};
use bridge::translator::TranslateContext;
use bridge::{config, error::ErrorEvent};
use bridge_protocol::Platform;
use bridge_store::Store;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    info!(version = env!("CARGO_PKG_VERSION"), "bridge starting");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "/etc/chatbridge/bridge.toml".to_string());
    let cfg = match config::load(&PathBuf::from(&config_path)) {
        Ok(cfg) => {
            info!(routes = cfg.bridge_routes.len(), "config loaded");
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let store = match Store::open(&PathBuf::from(&cfg.database_file)) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("FATAL: failed to open store: {e}");
            std::process::exit(1);
        }
    };

    let media_proxy = cfg.platform_b.proxy.as_ref().map(|p| bridge_media::ProxyConfig { url: p.to_url() });
    let media = match bridge_media::MediaEngine::new(media_proxy) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            eprintln!("FATAL: failed to build media engine: {e}");
            std::process::exit(1);
        }
    };

    let (router_tx, router_rx) = mpsc::channel::<RouterEvent>(1024);

    let conn_a = WsAConnection::new(cfg.platform_a.clone(), router_tx.clone());
    let conn_b = match PollBConnection::new(cfg.platform_b.clone(), router_tx.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL: failed to build platform B connection: {e}");
            std::process::exit(1);
        }
    };

    let peer_a: Arc<dyn PeerSender> = conn_a.clone();
    let peer_b: Arc<dyn PeerSender> = conn_b.clone();

    let (error_tx, mut error_rx) = mpsc::channel::<ErrorEvent>(256);
    tokio::spawn(async move {
        while let Some(event) = error_rx.recv().await {
            error!(kind = %event.kind, platform = %event.platform, detail = %event.detail, "bridge error event");
        }
    });

    let mut send_peers: HashMap<Platform, Arc<dyn PeerSender>> = HashMap::new();
    send_peers.insert(Platform::A, peer_a.clone());
    send_peers.insert(Platform::B, peer_b.clone());
    let retry = RetryQueueHandle::new(store.clone(), media.clone(), send_peers, cfg.retry.retry_tick_seconds);

    let forward_a_to_b = Forwarder::new(
        Platform::A,
        Platform::B,
        peer_b.clone(),
        store.clone(),
        cfg.bridge_routes.clone(),
        TranslateContext { source_platform: Platform::A, target_platform: Platform::B, store: store.clone(), media: media.clone(), enable_miniapp_parsing: cfg.enable_miniapp_parsing, mention_refresh_interval_secs: 300, source_peer: Some(peer_a.clone()) },
        retry.clone(),
        cfg.retry.max_send_attempts,
        error_tx.clone(),
    );
    let forward_b_to_a = Forwarder::new(
        Platform::B,
        Platform::A,
        peer_a.clone(),
        store.clone(),
        cfg.bridge_routes.clone(),
        TranslateContext { source_platform: Platform::B, target_platform: Platform::A, store: store.clone(), media: media.clone(), enable_miniapp_parsing: cfg.enable_miniapp_parsing, mention_refresh_interval_secs: 300, source_peer: Some(peer_b.clone()) },
        retry.clone(),
        cfg.retry.max_send_attempts,
        error_tx.clone(),
    );

    let router = EventRouter::new(store.clone(), vec![forward_a_to_b, forward_b_to_a]);
    tokio::spawn(router.run(router_rx));

    let conn_a_mgr: Arc<dyn ConnectionManager> = conn_a.clone();
    let conn_b_mgr: Arc<dyn ConnectionManager> = conn_b.clone();
    conn_a_mgr.connect().await;
    conn_b_mgr.connect().await;

    if cfg.enable_retry_queue {
        tokio::spawn(retry.clone().run());
    }

    let status = BridgeStatus { version: env!("CARGO_PKG_VERSION").to_string(), ready: true };
    if let Err(e) = StatusServer::start(&cfg.status_http_bind, status, conn_a_mgr.clone(), conn_b_mgr.clone()).await {
        error!(error = %e, "status HTTP server failed to start; continuing without it");
    }

    shutdown_signal().await;
    info!("shutdown signal received, disconnecting");
    conn_a_mgr.disconnect().await;
    conn_b_mgr.disconnect().await;
    retry.stop();
    info!("bridge shut down gracefully");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
