// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Cerera Validator Node
//!
//! Entry point for the `cerera` binary: parse flags, set up logging, build
//! and start the [`Node`], optionally serve HTTP, and shut down cleanly on
//! SIGINT or SIGTERM.
//!
//! Exit status is 1 when the node cannot start (bad key file, unreadable
//! vault, malformed peers file, port in use) and 0 after a signal.

mod api;
mod cli;
mod logging;
mod metrics;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use cerera_protocol::Node;

use cli::CereraCli;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CereraCli::parse();

    if let Err(e) = logging::init_logging(&cli.log, cli.log_format) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "node failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: CereraCli) -> Result<()> {
    let config = cli.to_config();
    tracing::info!(
        listen = %config.listen,
        mode = ?config.mode,
        http = ?config.http_port,
        miner = config.miner,
        in_memory = config.in_memory,
        "starting cerera"
    );

    let node = Arc::new(Node::new(config.clone()).context("failed to initialize node")?);
    if node.key_generated() {
        tracing::info!(path = %config.key_path.display(), "generated new node key");
    }
    tracing::info!(address = %node.address(), "node identity");

    let local = node.start().await.context("failed to start node")?;
    tracing::info!(%local, advertise = %config.advertised_addr(), "node listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    let http_task = match config.http_port {
        Some(port) => {
            let metrics = NodeMetrics::new(node.registry()).context("failed to register metrics")?;
            let router = api::create_router(api::AppState {
                node: Arc::clone(&node),
                metrics,
            });
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
            tracing::info!(%addr, "HTTP API listening");
            Some(tokio::spawn(serve_http(listener, router, stop_rx)))
        }
        None => None,
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    let _ = stop_tx.send(true);
    if let Some(task) = http_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server exited with error"),
            Err(e) => tracing::warn!(error = %e, "HTTP server task failed"),
            Ok(Ok(())) => {}
        }
    }
    node.shutdown().await;
    tracing::info!("cerera stopped");
    Ok(())
}

async fn serve_http(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    mut stop: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await
}

/// Resolves on Ctrl-C or SIGTERM. If a handler cannot be installed the
/// other one still works; if neither can, the node runs until killed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
