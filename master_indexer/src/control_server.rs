use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{mpsc, Notify};
use tracing::info;

use crate::master_loop::MasterMsg;

/// Shared endpoints state: the preview-gate trigger and the loop channel.
#[derive(Clone)]
pub struct ControlState {
    pub start_notify: Arc<Notify>,
    pub master_tx: mpsc::UnboundedSender<MasterMsg>,
}

async fn handle_start(State(state): State<ControlState>) -> &'static str {
    info!("Received external start trigger");
    state.start_notify.notify_one();
    "OK"
}

async fn handle_stop(State(state): State<ControlState>) -> &'static str {
    info!("Received external stop trigger");
    let _ = state.master_tx.send(MasterMsg::StopRequested);
    "OK"
}

/// Serves `/health` plus the start/stop control actions.
pub async fn start_control_server(state: ControlState) -> Result<()> {
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/control/start", post(handle_start))
        .route("/control/stop", post(handle_stop))
        .with_state(state);
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("Starting control server on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
