use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chain_rpc_client::ChainRpcClient;
use search_cluster_client::{bootstrap, SearchClusterClient};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tracing::{info, instrument};

use crate::broker;
use crate::config::LocalConfig;
use crate::dispatcher::ReaderDispatcher;
use crate::fleet;
use crate::live_tracker::LiveBlockTracker;
use crate::master_loop::{
    start_interval, Master, MasterMsg, IPC_RATE_INTERVAL, LOG_INTERVAL,
};
use crate::monitor::ProgressMonitor;
use crate::supervisor::spawn_worker;
use crate::workers::{IngestorKind, WorkerRegistry, WorkerRole};

/// How long preview mode waits for the external start trigger.
const PREVIEW_DEADLINE: Duration = Duration::from_secs(600);

/// Mapping fields specific to each logical index, appended to the shared
/// template base.
fn extra_mappings(kind: &IngestorKind) -> Value {
    match kind {
        IngestorKind::Action => json!({
            "global_sequence": { "type": "long" },
            "trx_id": { "type": "keyword" },
            "notified": { "type": "keyword" }
        }),
        IngestorKind::Delta => json!({
            "code": { "type": "keyword" },
            "scope": { "type": "keyword" },
            "table": { "type": "keyword" },
            "primary_key": { "type": "long" }
        }),
        IngestorKind::Block => json!({
            "producer": { "type": "keyword" },
            "schedule_version": { "type": "long" }
        }),
        IngestorKind::Abi => json!({
            "account": { "type": "keyword" },
            "abi": { "type": "object", "enabled": false },
            "block": { "type": "long" }
        }),
        IngestorKind::Logs => json!({
            "type": { "type": "keyword" }
        }),
        IngestorKind::Table(_) => json!({
            "payer": { "type": "keyword" },
            "scope": { "type": "keyword" }
        }),
    }
}

fn open_ds_error_log(chain: &str) -> Result<std::fs::File> {
    let dir = format!(".logs/{}", chain);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir))?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(format!("{}/deserialization_errors.log", dir))
        .context("Failed to open the deserialization error log")
}

fn log_plan(registry: &WorkerRegistry) {
    info!("Planned fleet ({} workers):", registry.all().len());
    for def in registry.all() {
        match &def.role {
            WorkerRole::Reader {
                first_block,
                last_block,
            } => info!(
                "  #{} reader [{}, {})",
                def.id, first_block, last_block
            ),
            WorkerRole::ContinuousReader {
                last_processed_block,
            } => info!(
                "  #{} continuous_reader from {}",
                def.id, last_processed_block
            ),
            WorkerRole::Deserializer { queue, live_mode } => {
                info!("  #{} deserializer on {} (live: {})", def.id, queue, live_mode)
            }
            WorkerRole::Ingestor { queue, .. } => {
                info!("  #{} ingestor on {}", def.id, queue)
            }
            WorkerRole::Router => info!("  #{} router", def.id),
            WorkerRole::DsPoolWorker { local_id } => {
                info!("  #{} ds_pool_worker (local {})", def.id, local_id)
            }
        }
    }
}

/// Orchestrates the startup sequence, then hands control to the event loop.
pub struct LifecycleController;

impl LifecycleController {
    /// Runs the full startup sequence in order. Every step must succeed
    /// before the next; the error context names the failed subsystem so
    /// fatal exits are attributable from the log alone.
    #[instrument("LIFECYCLE", skip_all)]
    pub async fn start(
        config: Arc<LocalConfig>,
        search: Arc<SearchClusterClient>,
        chain_rpc: Arc<ChainRpcClient>,
        start_notify: Arc<Notify>,
        master_tx: mpsc::UnboundedSender<MasterMsg>,
        master_rx: mpsc::UnboundedReceiver<MasterMsg>,
    ) -> Result<()> {
        if config.indexer.purge_queues {
            broker::purge_queues(&config)
                .await
                .context("Queue purge failed")?;
        }

        search
            .ping()
            .await
            .context("Search cluster ingest check failed")?;

        bootstrap::put_update_by_block_script(&search)
            .await
            .context("Stored script install failed")?;

        bootstrap::put_lifecycle_policy(&search, 25)
            .await
            .context("Lifecycle policy install failed")?;

        let catalogue = fleet::index_catalogue(&config);
        for kind in &catalogue {
            bootstrap::put_index_template(&search, &config.chain, &kind.name(), &extra_mappings(kind))
                .await
                .context("Index template update failed")?;
        }
        for kind in &catalogue {
            bootstrap::create_versioned_index_with_alias(
                &search,
                &config.chain,
                &kind.name(),
                config.index_version.as_deref(),
            )
            .await
            .context("Index creation failed")?;
        }

        let chain_info = chain_rpc
            .get_info()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Chain node unreachable")?;
        info!(
            "Chain {} at head block {}",
            chain_info.chain_id, chain_info.head_block_num
        );

        let range = fleet::compute_block_range(&config, &search, chain_info.head_block_num)
            .await
            .context("Block range computation failed")?;

        let (roles, seed) = fleet::build_fleet(&config, &range, chain_info.head_block_num);
        let mut registry = WorkerRegistry::new();
        for role in roles {
            registry.add(role);
        }
        log_plan(&registry);

        if config.indexer.preview {
            info!("Preview mode: blocked until an external start trigger arrives");
            tokio::time::timeout(PREVIEW_DEADLINE, start_notify.notified())
                .await
                .context("No start trigger arrived within the preview deadline")?;
        }

        let ds_error_log = open_ds_error_log(&config.chain)?;

        let mut live_tracker = LiveBlockTracker::new();
        if config.indexer.live_reader {
            match chain_rpc.get_producer_schedule().await {
                Ok(schedule) => live_tracker.seed_schedule(
                    schedule
                        .active
                        .producers
                        .into_iter()
                        .map(|p| p.producer_name)
                        .collect(),
                    schedule.active.version,
                ),
                Err(e) => info!("Producer schedule not seeded: {}", e),
            }
        }

        start_interval(master_tx.clone(), LOG_INTERVAL, MasterMsg::MonitorTick);

        let dispatcher = ReaderDispatcher::new(&range, config.scaling.batch_size, &seed);
        let monitor = ProgressMonitor::new(
            LOG_INTERVAL.as_secs_f64(),
            range.total_range,
            config.indexer.live_only_mode,
            config.indexer.auto_stop,
        );
        let mut master = Master::new(
            config.clone(),
            search,
            registry,
            dispatcher,
            live_tracker,
            monitor,
            Some(ds_error_log),
            master_tx.clone(),
        );

        let defs = master.registry.all().to_vec();
        for def in &defs {
            let handle = spawn_worker(&config, def, master_tx.clone()).await?;
            master.registry.attach_handle(def.id, handle);
        }
        info!("Spawned {} workers", defs.len());

        start_interval(master_tx.clone(), LOG_INTERVAL, MasterMsg::BalancerTick);
        start_interval(master_tx, IPC_RATE_INTERVAL, MasterMsg::IpcRateTick);

        info!("Master event loop running");
        master.run(master_rx).await;
        Ok(())
    }
}
