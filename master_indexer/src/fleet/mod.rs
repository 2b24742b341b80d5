use anyhow::Result;
use search_cluster_client::{markers, SearchClusterClient};
use tracing::{info, warn};

use crate::config::LocalConfig;
use crate::workers::{IngestorKind, WorkerRole};

/// The block range the run will cover, plus the reader budget derived from
/// the scaling configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedRange {
    pub starting_block: u64,
    pub head: u64,
    pub max_readers: u32,
    pub total_range: u64,
}

/// Resolves the ingestion range from configuration, chain state and the
/// markers already present in the search cluster.
///
/// The precedence is: last-indexed marker, then an explicit start override
/// (advanced past any block the cluster already holds unless a rewrite was
/// requested), then the stop override against the chain head, and finally
/// the ABI-scan marker which replaces the start entirely in ABI scan mode.
pub fn resolve_block_range(
    config: &LocalConfig,
    chain_head: u64,
    last_indexed_block: Option<u64>,
    last_indexed_abi: Option<u64>,
    probed_in_range: Option<u64>,
) -> ComputedRange {
    let mut starting_block: u64 = 1;
    if let Some(marker) = last_indexed_block {
        starting_block = marker;
    }

    if config.indexer.start_on != 0 {
        starting_block = config.indexer.start_on;
        if !config.indexer.rewrite {
            if let Some(probed) = probed_in_range {
                if probed > config.indexer.start_on {
                    warn!(
                        "Found indexed data up to block {} past the configured start {}, advancing",
                        probed, config.indexer.start_on
                    );
                    starting_block = probed;
                }
            }
        }
    }

    let mut head = chain_head;
    if config.indexer.stop_on != 0 {
        head = config.indexer.stop_on;
    }

    if config.indexer.abi_scan_mode {
        starting_block = last_indexed_abi.unwrap_or(1);
    }

    let max_readers = if config.indexer.disable_reading {
        1
    } else {
        config.scaling.readers
    };

    ComputedRange {
        starting_block,
        head,
        max_readers,
        total_range: head.saturating_sub(starting_block),
    }
}

/// Fetches the cluster markers and resolves the range against them.
pub async fn compute_block_range(
    config: &LocalConfig,
    search: &SearchClusterClient,
    chain_head: u64,
) -> Result<ComputedRange> {
    let last_indexed_block = markers::get_last_indexed_block(search, &config.chain).await?;
    let last_indexed_abi = if config.indexer.abi_scan_mode {
        markers::get_last_indexed_abi_block(search, &config.chain).await?
    } else {
        None
    };

    let probed_in_range = if config.indexer.start_on != 0 && !config.indexer.rewrite {
        markers::find_indexed_block_in_range(
            search,
            &config.chain,
            config.indexer.start_on,
            chain_head,
        )
        .await?
    } else {
        None
    };

    let range = resolve_block_range(
        config,
        chain_head,
        last_indexed_block,
        last_indexed_abi,
        probed_in_range,
    );
    info!(
        "Ingestion range resolved: [{}, {}) with up to {} parallel readers",
        range.starting_block, range.head, range.max_readers
    );
    Ok(range)
}

/// Catalogue of logical indices the run will write to, in creation order.
pub fn index_catalogue(config: &LocalConfig) -> Vec<IngestorKind> {
    let mut catalogue = vec![IngestorKind::Action];
    if config.features.index_deltas {
        catalogue.push(IngestorKind::Delta);
    }
    catalogue.push(IngestorKind::Block);
    catalogue.push(IngestorKind::Abi);
    catalogue.push(IngestorKind::Logs);
    if config.features.table_accounts {
        catalogue.push(IngestorKind::Table("accounts".to_string()));
    }
    if config.features.table_proposals {
        catalogue.push(IngestorKind::Table("proposals".to_string()));
    }
    if config.features.table_voters {
        catalogue.push(IngestorKind::Table("voters".to_string()));
    }
    catalogue
}

/// Initial dispatcher seed produced alongside the fleet: how many readers
/// were created and where the next range starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSeed {
    pub active_readers: u32,
    pub last_assigned_block: u64,
}

/// Builds the initial worker set in creation order.
///
/// The order (range readers, live pair, batch deserializers, ingestors,
/// router, ds pool) is observable through the monotonic worker ids but has
/// no semantic effect.
pub fn build_fleet(
    config: &LocalConfig,
    range: &ComputedRange,
    chain_head: u64,
) -> (Vec<WorkerRole>, ReaderSeed) {
    let mut roles = Vec::new();
    let batch_size = config.scaling.batch_size;

    // Range readers, one batch each up to the reader budget. In live-only
    // mode the batch backlog is skipped entirely.
    let mut active_readers: u32 = 0;
    let mut last_assigned_block = range.starting_block;
    if !config.indexer.live_only_mode {
        while active_readers < range.max_readers && last_assigned_block < range.head {
            let first_block = last_assigned_block;
            let last_block = std::cmp::min(last_assigned_block + batch_size, range.head);
            roles.push(WorkerRole::Reader {
                first_block,
                last_block,
            });
            last_assigned_block += batch_size;
            active_readers += 1;
        }
    }

    // Live pair: a continuous reader starting at the chain head and one
    // live-mode deserializer on the live queue.
    if config.indexer.live_reader {
        roles.push(WorkerRole::ContinuousReader {
            last_processed_block: chain_head,
        });
        roles.push(WorkerRole::Deserializer {
            queue: format!("{}:live_blocks", config.chain),
            live_mode: true,
        });
    }

    // Batch deserializers, round-robin over the block queues.
    let ds_total = config.scaling.ds_queues * config.scaling.ds_threads;
    for i in 0..ds_total {
        let queue_index = (i % config.scaling.ds_queues) + 1;
        roles.push(WorkerRole::Deserializer {
            queue: format!("{}:blocks:{}", config.chain, queue_index),
            live_mode: false,
        });
    }

    // Ingestors per catalogue entry. ABI is always a single group; action
    // and delta groups are widened by ad_idx_queues.
    for kind in index_catalogue(config) {
        let groups = if kind == IngestorKind::Abi {
            1
        } else {
            config.scaling.indexing_queues
        };
        let per_group = match kind {
            IngestorKind::Action | IngestorKind::Delta => config.scaling.ad_idx_queues,
            _ => 1,
        };
        for group in 1..=groups {
            for _ in 0..per_group {
                roles.push(WorkerRole::Ingestor {
                    queue: format!("{}:index_{}:{}", config.chain, kind.name(), group),
                    kind: kind.clone(),
                });
            }
        }
    }

    if config.features.streaming_enable {
        roles.push(WorkerRole::Router);
    }

    for local_id in 0..config.scaling.ds_pool_size {
        roles.push(WorkerRole::DsPoolWorker { local_id });
    }

    (
        roles,
        ReaderSeed {
            active_readers,
            last_assigned_block,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeaturesConfig, IndexerConfig, ScalingConfig};

    fn test_config() -> LocalConfig {
        LocalConfig {
            chain: "wax".to_string(),
            rpc_url: "http://localhost:8888".to_string(),
            worker_binary: "indexer-worker".to_string(),
            broker_api_url: "http://localhost:15672".to_string(),
            broker_vhost: "/".to_string(),
            broker_user: "guest".to_string(),
            broker_pass: "guest".to_string(),
            index_version: Some("v1".to_string()),
            scaling: ScalingConfig {
                readers: 2,
                batch_size: 100,
                ds_queues: 2,
                ds_threads: 2,
                indexing_queues: 2,
                ad_idx_queues: 2,
                ds_pool_size: 2,
            },
            indexer: IndexerConfig {
                start_on: 100,
                stop_on: 340,
                rewrite: false,
                live_reader: false,
                live_only_mode: false,
                abi_scan_mode: false,
                disable_reading: false,
                purge_queues: false,
                preview: false,
                auto_stop: 0,
            },
            features: FeaturesConfig {
                index_deltas: true,
                streaming_enable: false,
                streaming_deltas: false,
                streaming_traces: false,
                table_accounts: false,
                table_proposals: false,
                table_voters: false,
            },
        }
    }

    #[test]
    fn test_initial_reader_ranges() {
        let config = test_config();
        let range = resolve_block_range(&config, 100000, None, None, None);
        assert_eq!(range.starting_block, 100);
        assert_eq!(range.head, 340);

        let (roles, seed) = build_fleet(&config, &range, 100000);
        let readers: Vec<_> = roles
            .iter()
            .filter_map(|r| match r {
                WorkerRole::Reader {
                    first_block,
                    last_block,
                } => Some((*first_block, *last_block)),
                _ => None,
            })
            .collect();
        assert_eq!(readers, vec![(100, 200), (200, 300)]);
        assert_eq!(seed.active_readers, 2);
        assert_eq!(seed.last_assigned_block, 300);
    }

    #[test]
    fn test_marker_overrides_default_start() {
        let mut config = test_config();
        config.indexer.start_on = 0;
        config.indexer.stop_on = 0;
        let range = resolve_block_range(&config, 5000, Some(1234), None, None);
        assert_eq!(range.starting_block, 1234);
        assert_eq!(range.head, 5000);
    }

    #[test]
    fn test_probe_advances_start_unless_rewrite() {
        let mut config = test_config();
        config.indexer.stop_on = 0;
        let range = resolve_block_range(&config, 5000, Some(50), None, Some(700));
        assert_eq!(range.starting_block, 700);

        config.indexer.rewrite = true;
        let range = resolve_block_range(&config, 5000, Some(50), None, Some(700));
        assert_eq!(range.starting_block, 100);
    }

    #[test]
    fn test_abi_scan_mode_uses_abi_marker() {
        let mut config = test_config();
        config.indexer.abi_scan_mode = true;
        let range = resolve_block_range(&config, 5000, Some(50), Some(333), None);
        assert_eq!(range.starting_block, 333);
    }

    #[test]
    fn test_disable_reading_caps_readers_at_one() {
        let mut config = test_config();
        config.indexer.disable_reading = true;
        let range = resolve_block_range(&config, 5000, None, None, None);
        assert_eq!(range.max_readers, 1);
    }

    #[test]
    fn test_fleet_composition() {
        let mut config = test_config();
        config.indexer.live_reader = true;
        config.features.streaming_enable = true;
        config.features.table_accounts = true;
        let range = resolve_block_range(&config, 100000, None, None, None);
        let (roles, _) = build_fleet(&config, &range, 100000);

        let count = |pred: fn(&WorkerRole) -> bool| roles.iter().filter(|r| pred(r)).count();
        assert_eq!(
            count(|r| matches!(r, WorkerRole::ContinuousReader { .. })),
            1
        );
        // 1 live deserializer + ds_queues * ds_threads batch ones
        assert_eq!(count(|r| matches!(r, WorkerRole::Deserializer { .. })), 5);
        assert_eq!(count(|r| matches!(r, WorkerRole::Router)), 1);
        assert_eq!(count(|r| matches!(r, WorkerRole::DsPoolWorker { .. })), 2);

        // action: 2 groups x 2, delta: 2 groups x 2, block: 2, abi: 1,
        // logs: 2, table-accounts: 2
        assert_eq!(count(|r| matches!(r, WorkerRole::Ingestor { .. })), 15);

        let abi_queues: Vec<_> = roles
            .iter()
            .filter_map(|r| match r {
                WorkerRole::Ingestor { queue, kind } if *kind == IngestorKind::Abi => {
                    Some(queue.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(abi_queues, vec!["wax:index_abi:1".to_string()]);
    }

    #[test]
    fn test_live_only_mode_skips_range_readers() {
        let mut config = test_config();
        config.indexer.live_only_mode = true;
        config.indexer.live_reader = true;
        let range = resolve_block_range(&config, 100000, None, None, None);
        let (roles, seed) = build_fleet(&config, &range, 100000);
        assert!(!roles.iter().any(|r| matches!(r, WorkerRole::Reader { .. })));
        assert_eq!(seed.active_readers, 0);
    }

    #[test]
    fn test_replanning_is_deterministic() {
        let config = test_config();
        let range = resolve_block_range(&config, 100000, None, None, None);
        let (first, _) = build_fleet(&config, &range, 100000);
        let (second, _) = build_fleet(&config, &range, 100000);
        assert_eq!(first, second);
    }
}
