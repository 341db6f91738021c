//! docrelay API server binary.
//!
//! Usage:
//!   docrelay-api --config docrelay.toml
//!   docrelay-api --port 8004
//!   docrelay-api --port 8004 --bind 0.0.0.0
//!   docrelay-api --memory  # In-memory sources, no external services
//!
//! # Environment Variables
//!
//! - `DOCRELAY_BIND_ADDR` - Server bind address (default: 127.0.0.1)
//! - `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` - Keys for LLM-backed planners

use anyhow::Context;
use docrelay_api::{AppContext, bootstrap, serve};
use docrelay_coordinator::CoordinatorConfig;
use docrelay_coordinator::config::DEFAULT_API_PORT;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_help() {
    println!("docrelay API Server");
    println!();
    println!("Usage: docrelay-api [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -p, --port <PORT>        Port to listen on (default: {DEFAULT_API_PORT})");
    println!("  -b, --bind <ADDR>        Bind address (default: 127.0.0.1, env: DOCRELAY_BIND_ADDR)");
    println!("  -c, --config <FILE>      Path to a docrelay TOML config file");
    println!("  -m, --memory             Use in-memory sources instead of remote services");
    println!("  -h, --help               Show this help message");
    println!();
    println!("Environment variables:");
    println!("  DOCRELAY_BIND_ADDR       Server bind address (overridden by --bind flag)");
    println!("  OPENAI_API_KEY           OpenAI API key for LLM planners");
    println!("  ANTHROPIC_API_KEY        Anthropic API key for LLM planners");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,docrelay_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut port: u16 = DEFAULT_API_PORT;
    let mut config_path: Option<String> = None;
    let mut bind_addr: Option<String> = None;
    let mut in_memory = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1]
                        .parse()
                        .with_context(|| format!("Invalid port number: {}", args[i + 1]))?;
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    bind_addr = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--memory" | "-m" => {
                in_memory = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                tracing::warn!(argument = %other, "Ignoring unknown argument");
            }
        }
        i += 1;
    }

    let host = bind_addr
        .or_else(|| std::env::var("DOCRELAY_BIND_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    if host == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0. This exposes the API to all network interfaces; \
             put it behind a firewall or an authenticating proxy."
        );
    }

    let config = match (config_path, in_memory) {
        (_, true) => {
            tracing::info!("Using in-memory sources");
            CoordinatorConfig::in_memory()
        }
        (Some(path), false) => {
            tracing::info!(path = %path, "Loading configuration");
            CoordinatorConfig::from_file(&path)?
        }
        (None, false) => {
            tracing::info!("Using default configuration");
            CoordinatorConfig::default()
        }
    };

    let ctx = Arc::new(AppContext::new(config));

    // Agents come up in the background; /chat answers 503 until then.
    let init_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = bootstrap(&init_ctx).await {
            tracing::error!(error = %e, "Failed to initialize agents");
            std::process::exit(1);
        }
    });

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    serve(ctx.clone(), addr, shutdown_signal()).await?;

    if let Some(supervisor) = ctx.supervisor() {
        supervisor.shutdown().await;
    }
    Ok(())
}
