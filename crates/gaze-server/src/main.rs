//! Gaze server: local HTTP + WebSocket API over the engine.

mod auth;
mod lockfile;
mod logging;
mod routes;
mod state;
mod ws;

use anyhow::Context;
use gaze_core::GazeEngine;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn data_dir() -> PathBuf {
    std::env::var("GAZE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs_fallback_home()
                .join(".gaze")
        })
}

fn dirs_fallback_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    logging::init(&data_dir.join("gaze.log"))?;

    let engine = GazeEngine::open(&data_dir)
        .await
        .context("opening engine")?;

    let host = std::env::var("GAZE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("GAZE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let token = std::env::var("GAZE_TOKEN").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    let state = Arc::new(AppState::new(engine, token.clone()));
    let app = routes::router(state.clone());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual = listener.local_addr()?;
    info!("Server listening on {}", actual);

    let lock_path = data_dir.join("engine.lock");
    lockfile::write_lockfile(&lock_path, actual.port(), &token)?;

    tokio::select! {
        result = async { axum::serve(listener, app).await } => {
            result.context("server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    let _ = std::fs::remove_file(&lock_path);
    Ok(())
}
