use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::LocalConfig;
use crate::master_loop::MasterMsg;
use crate::messages::parse_worker_event;
use crate::workers::{WorkerDef, WorkerHandle, WorkerRole};

/// Environment passed to a worker process: the process-manager contract.
pub fn role_env(def: &WorkerDef, config: &LocalConfig) -> Vec<(String, String)> {
    let mut env = vec![
        ("WORKER_ROLE".to_string(), def.role.kind_str().to_string()),
        ("WORKER_ID".to_string(), def.id.to_string()),
        ("CHAIN_NAME".to_string(), config.chain.clone()),
    ];
    match &def.role {
        WorkerRole::Reader {
            first_block,
            last_block,
        } => {
            env.push(("FIRST_BLOCK".to_string(), first_block.to_string()));
            env.push(("LAST_BLOCK".to_string(), last_block.to_string()));
        }
        WorkerRole::ContinuousReader {
            last_processed_block,
        } => {
            env.push((
                "WORKER_LAST_PROCESSED_BLOCK".to_string(),
                last_processed_block.to_string(),
            ));
        }
        WorkerRole::Deserializer { queue, live_mode } => {
            env.push(("WORKER_QUEUE".to_string(), queue.clone()));
            env.push(("LIVE_MODE".to_string(), live_mode.to_string()));
        }
        WorkerRole::Ingestor { queue, kind } => {
            env.push(("WORKER_QUEUE".to_string(), queue.clone()));
            env.push(("INDEX_TYPE".to_string(), kind.name()));
        }
        WorkerRole::Router => {
            env.push((
                "STREAM_DELTAS".to_string(),
                config.features.streaming_deltas.to_string(),
            ));
            env.push((
                "STREAM_TRACES".to_string(),
                config.features.streaming_traces.to_string(),
            ));
        }
        WorkerRole::DsPoolWorker { local_id } => {
            env.push(("WORKER_LOCAL_ID".to_string(), local_id.to_string()));
        }
    }
    env
}

/// Spawns one worker process and wires its stdio to the master channel.
///
/// Downstream messages are written as one JSON object per line on the
/// worker's stdin; upstream events are read line by line from its stdout.
/// EOF on stdout is reported as a worker exit.
pub async fn spawn_worker(
    config: &LocalConfig,
    def: &WorkerDef,
    master_tx: mpsc::UnboundedSender<MasterMsg>,
) -> Result<WorkerHandle> {
    let mut child = Command::new(&config.worker_binary)
        .envs(role_env(def, config))
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn {} worker {}", def.role.kind_str(), def.id))?;

    let mut stdin = child
        .stdin
        .take()
        .context("Worker process has no stdin pipe")?;
    let stdout = child
        .stdout
        .take()
        .context("Worker process has no stdout pipe")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker_id = def.id;

    // Writer: downstream messages to the worker's stdin.
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let mut line = match serde_json::to_string(&msg) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to serialize message for worker {}: {}", worker_id, e);
                    continue;
                }
            };
            line.push('\n');
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    // Reader: upstream events from the worker's stdout.
    let reader_tx = master_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<serde_json::Value>(&line) {
                        Ok(value) => {
                            let _ = reader_tx.send(MasterMsg::Worker {
                                worker_id,
                                event: parse_worker_event(value),
                            });
                        }
                        Err(_) => debug!("Worker {} wrote a non-JSON line", worker_id),
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        let _ = reader_tx.send(MasterMsg::WorkerExit { worker_id });
    });

    // Reap the process so exits are logged with their status.
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                if !status.success() {
                    warn!("Worker {} exited with {}", worker_id, status);
                }
            }
            Err(e) => warn!("Failed to wait on worker {}: {}", worker_id, e),
        }
    });

    Ok(WorkerHandle::new(tx))
}
