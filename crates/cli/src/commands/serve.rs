//! Serve command implementation
//!
//! `ferrule serve` runs an HTTP server with logging and recovery middleware
//! and a handful of diagnostic routes, then shuts it down gracefully on
//! Ctrl+C or SIGTERM.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use axum::{Extension, Json};
use clap::Args;
use ferrule_core::middleware::{chain, handler_fn, logging, recovery};
use ferrule_core::{transport, Context, Logger};
use ferrule_http::server::{logger, middleware};
use ferrule_http::{Server, ServerConfig, ServerInfo};
use serde_json::{json, Value};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "ferrule=debug,info";

/// Arguments for the serve command
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// TOML file with `network`, `address` and `timeout_ms`
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Listener network: tcp, tcp4 or tcp6
    #[arg(long)]
    pub network: Option<String>,
    /// Listen address, e.g. ":8000" or "127.0.0.1:0"
    #[arg(short, long)]
    pub address: Option<String>,
    /// Per-request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// How long shutdown waits for in-flight requests, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub shutdown_timeout_ms: u64,
}

/// Execute the serve command
pub async fn execute_serve_command(args: ServeArgs) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;
    let shutdown_timeout = Duration::from_millis(args.shutdown_timeout_ms);
    let server = build_server(config, Logger::current());

    let mut running = {
        let server = server.clone();
        tokio::spawn(async move { server.start(&Context::background()).await })
    };

    let addr = match server.ready().await {
        Ok(addr) => addr,
        Err(_) => {
            // start gave up before serving, its result says why
            return running
                .await
                .context("Server task panicked")?
                .context("Failed to start server");
        }
    };
    info!(%addr, "ferrule running, press Ctrl+C to shut down");

    tokio::select! {
        _ = wait_for_shutdown() => {}
        result = &mut running => {
            return result
                .context("Server task panicked")?
                .context("Server exited unexpectedly");
        }
    }

    info!(timeout_ms = args.shutdown_timeout_ms, "shutting down");
    let (ctx, _guard) = Context::background().with_timeout(shutdown_timeout);
    server
        .stop(&ctx)
        .await
        .context("Failed to shut down server gracefully")?;
    running
        .await
        .context("Server task panicked")?
        .context("Server failed while shutting down")?;

    info!("shutdown complete");
    Ok(())
}

/// Resolve the server config: file first, then explicit flags
pub fn load_config(args: &ServeArgs) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => ServerConfig::default(),
    };

    if let Some(network) = &args.network {
        config.network = network.clone();
    }
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<ServerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Build the server with its middleware and the built-in routes
pub fn build_server(config: ServerConfig, log: Logger) -> Server {
    let stack = chain([logging(log.clone()), recovery(log.clone())]);
    let mut server = Server::from_config(config, [logger(log), middleware(stack)]);

    server.handle_unary("/ping", handler_fn(|_ctx, _req| async move { Ok(json!("pong")) }));
    server.handle_unary("/echo", handler_fn(|_ctx, req| async move { Ok(req) }));
    server.route("/debug").get("/info", debug_info);
    server
}

async fn debug_info(Extension(ctx): Extension<Context>, info: ServerInfo) -> Json<Value> {
    let kind = transport::from_context(&ctx).map(|t| t.kind.to_string());
    Json(json!({
        "kind": kind,
        "method": info.request.method.as_str(),
        "path": info.request.path(),
        "remaining_ms": ctx.remaining().map(|d| d.as_millis() as u64),
    }))
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to install SIGTERM handler");
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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    fn parse(args: &[&str]) -> ServeArgs {
        TestCli::parse_from(std::iter::once("ferrule").chain(args.iter().copied())).serve
    }

    async fn call(server: &Server, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = server.serve_http(req).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_flags_default_to_server_config() {
        let args = parse(&[]);
        assert_eq!(args.shutdown_timeout_ms, 5000);
        assert_eq!(load_config(&args).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_flags_override_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ferrule.toml");
        std::fs::write(&path, "network = \"tcp4\"\naddress = \"127.0.0.1:9100\"\ntimeout_ms = 250\n").unwrap();

        let args = parse(&["--config", path.to_str().unwrap(), "--address", "127.0.0.1:9200"]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.network, "tcp4");
        assert_eq!(config.address, "127.0.0.1:9200");
        assert_eq!(config.timeout_ms, 250);
    }

    #[test]
    fn test_missing_config_file() {
        let args = parse(&["--config", "/nonexistent/ferrule.toml"]);
        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.toml");
        std::fs::write(&path, "timeout_ms = \"soon\"").unwrap();

        let args = parse(&["-c", path.to_str().unwrap()]);
        assert!(load_config(&args).is_err());
    }

    #[tokio::test]
    async fn test_builtin_routes() {
        let server = build_server(ServerConfig::default(), Logger::current());

        let (status, body) = call(&server, Method::GET, "/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("pong"));

        let (status, body) = call(&server, Method::POST, "/echo", r#"{"hello":"world"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"hello": "world"}));

        let (status, body) = call(&server, Method::GET, "/debug/info", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "HTTP");
        assert_eq!(body["method"], "GET");
        assert_eq!(body["path"], "/debug/info");
        assert!(body["remaining_ms"].as_u64().unwrap() <= 1000);

        let (status, body) = call(&server, Method::POST, "/debug/info", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["reason"], "METHOD_NOT_ALLOWED");
    }
}
