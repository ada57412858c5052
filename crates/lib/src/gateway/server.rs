//! Gateway startup: cache, Telegram client, transports, listeners, graceful shutdown.

use crate::channels::TelegramClient;
use crate::config::Config;
use crate::delivery::{ChatGateway, Deliver};
use crate::gateway::http;
use crate::gateway::inbound::InboundPipeline;
use crate::gateway::mux::{self, Routes};
use crate::gateway::relay;
use crate::gateway::tls::build_tls_acceptor;
use crate::gateway::ws::{Liveness, WsTransport};
use crate::routing::ThreadCache;
use crate::signature::SignatureVerifier;
use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Run the gateway until SIGINT or SIGTERM.
pub async fn run_gateway(config: Config, data_dir: PathBuf) -> Result<()> {
    run_gateway_until(config, data_dir, shutdown_signal()).await
}

/// Run the gateway until `shutdown` completes.
/// Fails fast on invalid config, an unreadable cache, a rejected bot token, or a busy port.
pub async fn run_gateway_until(
    config: Config,
    data_dir: PathBuf,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    config.validate().context("invalid configuration")?;

    let cache = Arc::new(
        ThreadCache::in_dir(&data_dir)
            .await
            .with_context(|| format!("opening thread cache in {}", data_dir.display()))?,
    );

    let telegram = TelegramClient::new(&config.telegram.api_base, config.telegram.bot_token.clone());
    let me = telegram
        .get_me()
        .await
        .context("validating telegram bot token (getMe)")?;
    log::info!(
        "telegram bot @{} ready, routing into group {}",
        me.username.as_deref().unwrap_or("?"),
        config.telegram.target_group_id
    );

    let group_id = config.telegram.target_group_id;
    let delivery: Arc<dyn Deliver> = Arc::new(ChatGateway::new(
        Arc::new(telegram.clone()),
        cache.clone(),
        group_id,
    ));
    let max_skew = config.signature.max_skew();
    let http_pipeline = InboundPipeline::new(
        delivery.clone(),
        SignatureVerifier::new(config.http.secret_key.clone(), max_skew),
    );
    let ws_transport = WsTransport::new(
        InboundPipeline::new(
            delivery,
            SignatureVerifier::new(config.ws.secret_key.clone(), max_skew),
        ),
        Liveness::from_config(&config.ws),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    let bind = config.bind.trim();

    if config.shares_port() {
        let listener = bind_listener(bind, config.http.port).await?;
        let tls = build_tls_acceptor(&config.http.tls)?;
        log::info!(
            "serving http and ws on shared port {}:{}{}",
            bind,
            config.http.port,
            if tls.is_some() { " (tls)" } else { "" }
        );
        let routes = Routes::Shared {
            http: http::router(http_pipeline),
            ws: ws_transport.router(),
        };
        tasks.push(tokio::spawn(mux::serve(listener, tls, routes, shutdown_rx.clone())));
    } else {
        if config.http.enabled {
            let listener = bind_listener(bind, config.http.port).await?;
            let tls = build_tls_acceptor(&config.http.tls)?;
            log::info!("serving http on {}:{}", bind, config.http.port);
            let routes = Routes::Single(http::router(http_pipeline));
            tasks.push(tokio::spawn(mux::serve(listener, tls, routes, shutdown_rx.clone())));
        }
        if config.ws.enabled {
            let listener = bind_listener(bind, config.ws.port).await?;
            let tls = build_tls_acceptor(&config.ws.tls)?;
            log::info!("serving ws on {}:{}", bind, config.ws.port);
            let routes = Routes::Single(ws_transport.router());
            tasks.push(tokio::spawn(mux::serve(listener, tls, routes, shutdown_rx.clone())));
        }
    }

    if config.telegram.relay_replies {
        if config.ws.enabled {
            tasks.push(tokio::spawn(relay::run_reply_relay(
                telegram,
                cache.clone(),
                group_id,
                ws_transport.registry().clone(),
                shutdown_rx.clone(),
            )));
        } else {
            log::warn!("telegram.relayReplies is set but the ws transport is disabled; ignoring");
        }
    }

    shutdown.await;
    log::info!("shutdown requested, closing listeners and connections");
    let _ = shutdown_tx.send(true);
    ws_transport.registry().close_all();
    for t in tasks {
        let _ = t.await;
    }
    log::info!("gateway stopped ({} thread assignment(s) cached)", cache.len().await);
    Ok(())
}

/// Bind a TCP listener on `bind:port`.
pub async fn bind_listener(bind: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{}:{}", bind, port);
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {}", addr))
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
