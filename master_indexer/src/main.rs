use std::sync::Arc;

use anyhow::{Context, Result};
use chain_rpc_client::ChainRpcClient;
use master_indexer::config::LocalConfig;
use master_indexer::control_server::{start_control_server, ControlState};
use master_indexer::lifecycle::LifecycleController;
use master_indexer::utils;
use search_cluster_client::SearchClusterClient;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main entry point for the chain history master controller
///
/// This function performs the following steps:
/// 1. Initializes the pre-run environment
/// 2. Starts the lifecycle controller (startup sequence + event loop)
/// 3. Starts the control/health server
/// 4. Handles if any of the services fails
#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_pre_run()?;

    info!("Starting the chain history master controller");

    let config = Arc::new(LocalConfig::load_from_env()?);
    let search = Arc::new(SearchClusterClient::from_env()?);
    let chain_rpc = Arc::new(ChainRpcClient::new(&config.rpc_url, 5));

    let start_notify = Arc::new(Notify::new());
    let (master_tx, master_rx) = mpsc::unbounded_channel();

    let mut lifecycle: JoinHandle<Result<()>> = tokio::spawn(LifecycleController::start(
        config,
        search,
        chain_rpc,
        start_notify.clone(),
        master_tx.clone(),
        master_rx,
    ));

    let mut control_server = tokio::spawn(start_control_server(ControlState {
        start_notify,
        master_tx,
    }));

    // Whichever side resolves first decides the process fate: a failed
    // startup step or preview timeout must exit with failure immediately,
    // not sit behind the forever-running control server.
    tokio::select! {
        result = &mut lifecycle => {
            control_server.abort();
            match result {
                Ok(Ok(())) => {
                    info!("Master controller stopped");
                    Ok(())
                }
                Ok(Err(e)) => {
                    let error_message = e.chain().map(|e| e.to_string()).collect::<Vec<_>>().join(" -> ");
                    error!("Lifecycle controller failed with error: {}", error_message);
                    Err(anyhow::anyhow!("Lifecycle controller failed: {}", error_message))
                }
                Err(e) => {
                    error!("Lifecycle controller task panicked: {}", e);
                    Err(anyhow::anyhow!("Lifecycle controller task panicked: {}", e))
                }
            }
        }
        result = &mut control_server => {
            lifecycle.abort();
            match result {
                Ok(Ok(())) => {
                    error!("Control server stopped unexpectedly");
                    Err(anyhow::anyhow!("Control server stopped unexpectedly"))
                }
                Ok(Err(e)) => {
                    let error_message = e.chain().map(|e| e.to_string()).collect::<Vec<_>>().join(" -> ");
                    error!("Control server failed with error: {}", error_message);
                    Err(anyhow::anyhow!("Control server failed: {}", error_message))
                }
                Err(e) => {
                    error!("Control server task panicked: {}", e);
                    Err(anyhow::anyhow!("Control server task panicked: {}", e))
                }
            }
        }
    }?;

    Ok(())
}

/// Initializes the pre-run environment
///
/// This function performs the following steps:
/// 1. Loads environment variables from the `.env` file when present
/// 2. Sets up the logger
fn init_pre_run() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::logger::setup_logger().context("Failed to setup logger")?;
    Ok(())
}
