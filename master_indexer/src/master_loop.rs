use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use search_cluster_client::SearchClusterClient;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::balancer::ContractUsageBalancer;
use crate::config::LocalConfig;
use crate::dispatcher::ReaderDispatcher;
use crate::live_tracker::LiveBlockTracker;
use crate::messages::{DownstreamMessage, WorkerEvent};
use crate::monitor::ProgressMonitor;
use crate::router;
use crate::workers::WorkerRegistry;

/// Idle grace before a drain is allowed to complete.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
/// Cadence of the IPC throughput log line.
pub const IPC_RATE_INTERVAL: Duration = Duration::from_secs(10);
/// Cadence of the progress monitor and the usage balancer.
pub const LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Everything the event loop reacts to. Worker messages and timer ticks
/// funnel through one channel, so handlers never observe each other
/// mid-mutation.
#[derive(Debug, Clone)]
pub enum MasterMsg {
    Worker { worker_id: u64, event: WorkerEvent },
    WorkerExit { worker_id: u64 },
    BroadcastAbi,
    BalancerTick,
    MonitorTick,
    IpcRateTick,
    StopRequested,
}

/// The controller state. Owned by a single task; every mutation happens in
/// a handler invoked from the event loop.
pub struct Master {
    pub config: Arc<LocalConfig>,
    pub search: Arc<SearchClusterClient>,
    pub registry: WorkerRegistry,
    pub dispatcher: ReaderDispatcher,
    pub live_tracker: LiveBlockTracker,
    pub balancer: ContractUsageBalancer,
    pub monitor: ProgressMonitor,
    pub last_processed_block: u64,
    pub stored_abi: Option<serde_json::Value>,
    pub ds_error_log: Option<std::fs::File>,
    pub allow_shutdown: Arc<AtomicBool>,
    pub tx: mpsc::UnboundedSender<MasterMsg>,
    ipc_messages: u64,
    shutdown_timer: Option<JoinHandle<()>>,
    had_live_workers: bool,
}

impl Master {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<LocalConfig>,
        search: Arc<SearchClusterClient>,
        registry: WorkerRegistry,
        dispatcher: ReaderDispatcher,
        live_tracker: LiveBlockTracker,
        monitor: ProgressMonitor,
        ds_error_log: Option<std::fs::File>,
        tx: mpsc::UnboundedSender<MasterMsg>,
    ) -> Self {
        let pool_size = config.scaling.ds_pool_size;
        Self {
            config,
            search,
            registry,
            dispatcher,
            live_tracker,
            balancer: ContractUsageBalancer::new(pool_size),
            monitor,
            last_processed_block: 0,
            stored_abi: None,
            ds_error_log,
            allow_shutdown: Arc::new(AtomicBool::new(false)),
            tx,
            ipc_messages: 0,
            shutdown_timer: None,
            had_live_workers: false,
        }
    }

    /// Consumes messages until every sender is gone. All shared-state
    /// mutation happens inside this loop.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MasterMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                MasterMsg::Worker { worker_id, event } => {
                    self.ipc_messages += 1;
                    router::handle_worker_event(&mut self, worker_id, event);
                }
                MasterMsg::WorkerExit { worker_id } => self.on_worker_exit(worker_id),
                MasterMsg::BroadcastAbi => self.on_broadcast_abi(),
                MasterMsg::BalancerTick => self.on_balancer_tick(),
                MasterMsg::MonitorTick => self.on_monitor_tick(),
                MasterMsg::IpcRateTick => self.on_ipc_rate_tick(),
                MasterMsg::StopRequested => self.on_stop_requested(),
            }
        }
    }

    fn on_worker_exit(&mut self, worker_id: u64) {
        warn!("Worker {} disconnected", worker_id);
        self.registry.mark_exited(worker_id);
    }

    /// Fires once the post-`init_abi` delay elapses. The fleet is read at
    /// fire time, so workers that attached during the delay are included.
    pub(crate) fn on_broadcast_abi(&mut self) {
        if let Some(data) = self.stored_abi.clone() {
            self.registry
                .broadcast(&DownstreamMessage::InitializeAbi { data });
        }
    }

    pub(crate) fn on_balancer_tick(&mut self) {
        let Some(outcome) = self.balancer.tick() else {
            return;
        };
        for (local_id, contract) in &outcome.removals {
            self.registry.send_to_pool_worker(
                *local_id,
                DownstreamMessage::RemoveContract {
                    contract: contract.clone(),
                },
            );
        }
        for (local_id, contract) in &outcome.assignments {
            info!("Assigned contract {} to pool worker {}", contract, local_id);
        }
        self.registry.send_to_deserializers(
            &DownstreamMessage::UpdatePoolMap {
                data: outcome.snapshot,
            },
            None,
        );
    }

    pub(crate) fn on_monitor_tick(&mut self) {
        let outcome = self.monitor.tick();

        if outcome.idle {
            if self.shutdown_timer.is_none() {
                let allow_shutdown = self.allow_shutdown.clone();
                self.shutdown_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                    allow_shutdown.store(true, Ordering::SeqCst);
                }));
            }
            if outcome.auto_stop_triggered {
                error!(
                    "Nothing moved for {} seconds, giving up",
                    self.config.indexer.auto_stop
                );
                std::process::exit(1);
            }
        } else if let Some(timer) = self.shutdown_timer.take() {
            timer.abort();
        }

        let live = self.registry.live_count();
        if live > 0 {
            self.had_live_workers = true;
        } else if self.had_live_workers {
            error!("All workers are gone, terminating");
            std::process::exit(1);
        }
    }

    fn on_ipc_rate_tick(&mut self) {
        info!(
            "IPC throughput: {:.1} messages/s",
            self.ipc_messages as f64 / IPC_RATE_INTERVAL.as_secs_f64()
        );
        self.ipc_messages = 0;
    }

    /// External stop: freeze range dispatch, tell every worker to wind
    /// down, then leave once the monitor has seen enough idle time.
    pub(crate) fn on_stop_requested(&mut self) {
        info!("Stop requested, draining workers");
        self.dispatcher.stop_dispatching();
        self.registry.broadcast(&DownstreamMessage::Stop);

        let allow_shutdown = self.allow_shutdown.clone();
        tokio::spawn(async move {
            loop {
                if allow_shutdown.load(Ordering::SeqCst) {
                    info!("Drain complete, exiting");
                    std::process::exit(0);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });
    }
}

/// Repeatedly sends `msg` into the loop at the given period.
pub fn start_interval(tx: mpsc::UnboundedSender<MasterMsg>, period: Duration, msg: MasterMsg) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval is immediate.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(msg.clone()).is_err() {
                break;
            }
        }
    });
}
