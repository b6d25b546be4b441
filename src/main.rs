mod config;
mod domain;
mod driver;
mod encoder;
mod error;
mod export;
mod handlers;
mod metrics;
mod pool;
mod registry;
mod templates;
mod translator;
mod validator;

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use config::ServiceConfig;
use driver::ChromiumDriverFactory;
use metrics::PerformanceMonitor;
use pool::Pool;
use registry::{Dispatcher, Registry};

/// Entry point for the GeoGebra orchestration service.
///
/// Parses configuration, wires the pool/dispatcher, starts the idle sweeper,
/// and runs a line-delimited JSON-RPC loop over stdio until SIGINT/SIGTERM or
/// EOF, then drains the pool before exiting.
#[tokio::main]
async fn main() {
    let config = ServiceConfig::load();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.as_filter()))
        .init();

    tracing::info!(
        max_instances = config.max_instances,
        app_variant = ?config.app_variant,
        "starting gebrai-orchestrator"
    );

    let pool = Pool::new(config.clone(), Box::new(ChromiumDriverFactory));
    pool.spawn_sweeper().await;

    let monitor = Arc::new(PerformanceMonitor::new());
    let mut registry = Registry::new();
    handlers::register_all(&mut registry);
    let dispatcher = Arc::new(Dispatcher::new(registry, Arc::clone(&pool), monitor, config.ffmpeg_path.clone()));

    let serve = tokio::spawn(serve_stdio(Arc::clone(&dispatcher)));

    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                tracing::error!(error = %err, "stdio loop task panicked");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("draining instance pool");
    pool.shutdown().await;
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Minimal stdio JSON-RPC loop: one request per line in, one response per
/// line out. Only `tools/list` and `tools/call` are handled — framing and
/// the rest of MCP's handshake are out of scope (spec.md §1 Non-goals).
async fn serve_stdio(dispatcher: Arc<Dispatcher>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let stdout = std::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "error reading stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&dispatcher, &line).await;
        let mut out = stdout.lock();
        if writeln!(out, "{response}").is_err() {
            break;
        }
    }
}

async fn handle_line(dispatcher: &Dispatcher, line: &str) -> String {
    let request: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            return serde_json::json!({
                "error": { "code": "INVALID_TOOL_ARGUMENTS", "message": format!("malformed JSON-RPC request: {err}") }
            })
            .to_string();
        }
    };

    let id = request.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let method = request.get("method").and_then(serde_json::Value::as_str).unwrap_or("");

    let result = match method {
        "tools/list" => {
            let tools: Vec<serde_json::Value> = dispatcher
                .list_tools()
                .into_iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": t.input_schema,
                    })
                })
                .collect();
            serde_json::json!({ "tools": tools })
        }
        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or(serde_json::Value::Null);
            let name = params.get("name").and_then(serde_json::Value::as_str).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));
            let envelope = dispatcher.call(name, arguments).await;
            envelope.into_mcp_content()
        }
        other => serde_json::json!({
            "error": { "code": "TOOL_NOT_FOUND", "message": format!("unknown method '{other}'") }
        }),
    };

    serde_json::json!({ "id": id, "result": result }).to_string()
}
