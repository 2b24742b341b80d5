use std::io::Write;
use std::time::Duration;

use search_cluster_client::logs_index;
use tracing::{debug, error, info};

use crate::master_loop::{Master, MasterMsg};
use crate::messages::{is_monitor_record, DownstreamMessage, WorkerEvent};

/// Delay between storing the first ABI and broadcasting it. The broadcast
/// goes back through the event loop, so it reaches whatever workers are
/// attached when the delay elapses.
const ABI_BROADCAST_DELAY: Duration = Duration::from_secs(1);

/// Dispatches one worker message. Runs to completion on the event loop;
/// anything that needs I/O is handed to a spawned task.
pub fn handle_worker_event(master: &mut Master, worker_id: u64, event: WorkerEvent) {
    match event {
        WorkerEvent::ConsumedBlock {
            live: false,
            block_num,
            ..
        } => {
            master.monitor.counters.consumed_blocks += 1;
            master.last_processed_block = master.last_processed_block.max(block_num);
        }
        WorkerEvent::ConsumedBlock {
            live: true,
            block_num,
            producer,
        } => {
            master.monitor.counters.live_consumed_blocks += 1;
            if let Some(producer) = producer {
                let reports = master.live_tracker.handle_live_block(block_num, producer);
                if !reports.is_empty() {
                    let search = master.search.clone();
                    let chain = master.config.chain.clone();
                    tokio::spawn(async move {
                        for report in reports {
                            if let Err(e) =
                                logs_index::log_missed_blocks(&search, &chain, &report).await
                            {
                                error!("Failed to log missed blocks: {}", e);
                            }
                        }
                    });
                }
            }
        }
        WorkerEvent::InitAbi { data } => {
            if master.stored_abi.is_none() {
                master.stored_abi = Some(data);
                let tx = master.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(ABI_BROADCAST_DELAY).await;
                    let _ = tx.send(MasterMsg::BroadcastAbi);
                });
            }
        }
        WorkerEvent::RouterReady => {
            master.registry.broadcast(&DownstreamMessage::ConnectWs);
        }
        WorkerEvent::SaveAbi { live_mode, data, .. } => {
            if live_mode {
                master.registry.send_to_deserializers(
                    &DownstreamMessage::UpdateAbi { abi: data },
                    Some(worker_id),
                );
            }
        }
        WorkerEvent::Completed { .. } => {
            if let Some(range) = master.dispatcher.on_reader_completed() {
                master.registry.send(
                    worker_id,
                    DownstreamMessage::NewRange {
                        target: worker_id,
                        data: range,
                    },
                );
            }
        }
        WorkerEvent::AddIndex { size } => {
            master.monitor.counters.indexed_objects += size;
        }
        WorkerEvent::DsReport { actions, deltas } => {
            master.monitor.counters.deserialized_actions += actions;
            master.monitor.counters.deserialized_deltas += deltas;
        }
        WorkerEvent::DsError { data } => {
            if let Some(log) = master.ds_error_log.as_mut() {
                let line = serde_json::json!({
                    "@timestamp": chrono::Utc::now().to_rfc3339(),
                    "worker_id": worker_id,
                    "error": data,
                });
                if let Err(e) = writeln!(log, "{}", line) {
                    error!("Failed to append to the deserialization error log: {}", e);
                }
            }
        }
        WorkerEvent::ReadBlock { live } => {
            if live {
                master.monitor.counters.live_pushed_blocks += 1;
            } else {
                master.monitor.counters.pushed_blocks += 1;
            }
        }
        WorkerEvent::NewSchedule {
            live,
            block_num,
            new_producers,
        } => {
            if live {
                info!("New producer schedule at block {}", block_num);
                master
                    .live_tracker
                    .handle_new_schedule(new_producers.producers);
            }
        }
        WorkerEvent::DsReady => {
            debug!("Worker {} deserializer is ready", worker_id);
        }
        WorkerEvent::ContractUsageReport { total_hits, data } => {
            master.balancer.record_usage(total_hits, &data);
        }
        WorkerEvent::Unknown(value) => {
            if is_monitor_record(&value) {
                debug!("Monitoring report from worker {}", worker_id);
            }
        }
    }
}
