//! Reference XRPC node.
//!
//! Serves `io.example.ping` and `io.example.count`, and doubles as a client
//! for them:
//!
//!   xr-ping serve --port 8080
//!   xr-ping ping --url http://localhost:8080 "hello"
//!   xr-ping count --url http://localhost:8080 --start 1 --end 5
//!
//! Env vars:
//!   XR_CONFIG   config file (default: xrpc.toml)
//!   RUST_LOG    log filter

mod cli;
mod methods;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use xr_client::{Client, ClientBuilder};
use xr_domain::config::Config;
use xr_protocol::Frame;
use xr_server::{Dispatcher, XrpcServer};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (mut config, config_path) = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        None => {
            init_tracing();
            run_server(config).await
        }
        Some(Command::Serve { host, port }) => {
            init_tracing();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Some(Command::Ping { url, message }) => {
            init_cli_tracing();
            let client = client(&config, url)?;
            let output = client
                .method(methods::PING)
                .param("message", message)
                .json()
                .await
                .context("ping failed")?;
            println!("{}", serde_json::to_string_pretty(&output.unwrap_or(Value::Null))?);
            Ok(())
        }
        Some(Command::Count { url, start, end }) => {
            init_cli_tracing();
            let client = client(&config, url)?;
            let mut params = Map::new();
            params.insert("start".into(), start.into());
            if let Some(end) = end {
                params.insert("end".into(), end.into());
            }
            let mut frames = client
                .subscribe(methods::COUNT, params)
                .await
                .context("opening subscription")?;
            while let Some(frame) = frames.next().await {
                match frame.context("subscription failed")? {
                    Frame::Message { payload, .. } => println!("{payload}"),
                    Frame::Error(body) => anyhow::bail!("{}", body.error),
                }
            }
            Ok(())
        }
        Some(Command::CheckConfig) => {
            if !cli::report_config(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Structured JSON logs for the long-running server.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xr_server=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Compact stderr logs for one-shot client commands, `warn` by default so
/// stdout stays clean.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn client(config: &Config, url: Option<String>) -> anyhow::Result<Client> {
    let catalog = Arc::new(methods::catalog(&[])?);
    let mut builder = ClientBuilder::from_config(config).catalog(catalog);
    if let Some(url) = url {
        builder = builder.base_url(url);
    }
    Ok(builder.build()?)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    for issue in config.validate() {
        tracing::warn!(%issue, "config");
    }
    anyhow::ensure!(config.is_valid(), "invalid configuration");

    let catalog = Arc::new(
        methods::catalog(&config.server.lexicon_paths).context("loading lexicons")?,
    );
    let registry = methods::registry(catalog).context("registering handlers")?;
    let dispatcher = Dispatcher::new(Arc::new(registry), &config);
    let server = XrpcServer::new(dispatcher, config.server.clone());

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    server
        .serve(listener, shutdown_signal())
        .await
        .context("server error")?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "can't listen for SIGTERM");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
