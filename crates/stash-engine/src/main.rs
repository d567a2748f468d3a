use std::sync::Arc;

use stash_engine::bridge::BridgeHost;
use stash_engine::core::Engine;
use stash_engine::http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = stash_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("stash.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress noisy
    // connection-level DEBUG from HTTP client internals (hyper_util, reqwest).
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("stash log: {}", log_path.display());

    tracing::info!("stash starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match stash_proto::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("config unreadable, using defaults: {}", e);
            stash_proto::config::Config::default()
        }
    };

    // ── Engine ───────────────────────────────────────────────────────────────
    let bridge = BridgeHost::new();
    let engine = Engine::new(
        config.clone(),
        Arc::new(bridge.clone()),
        Arc::new(bridge.clone()),
        Arc::new(bridge.clone()),
    );
    let background = engine.spawn_background();

    // ── HTTP bridge ──────────────────────────────────────────────────────────
    let server = if config.http.enabled {
        Some(http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            Arc::clone(&engine),
            bridge,
        ))
    } else {
        tracing::warn!("bridge API disabled; nothing will reach the engine");
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("stash shutting down");

    let captured = engine.stop_capture().await;
    if captured > 0 {
        tracing::info!("flushed capture session ({} items)", captured);
    }
    for task in background.into_iter().chain(server) {
        task.abort();
    }
    Ok(())
}
