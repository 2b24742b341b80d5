use anyhow::Result;

use super::env_helper::{load_env_var, load_env_var_or};

/// Worker fleet sizing options.
#[derive(Debug, Clone)]
pub struct ScalingConfig {
    pub readers: u32,
    pub batch_size: u64,
    pub ds_queues: u32,
    pub ds_threads: u32,
    pub indexing_queues: u32,
    pub ad_idx_queues: u32,
    pub ds_pool_size: u32,
}

/// Ingestion range and mode options.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub start_on: u64,
    pub stop_on: u64,
    pub rewrite: bool,
    pub live_reader: bool,
    pub live_only_mode: bool,
    pub abi_scan_mode: bool,
    pub disable_reading: bool,
    pub purge_queues: bool,
    pub preview: bool,
    /// Seconds of full idle (nothing pushed) before the process gives up.
    /// Zero disables the auto stop.
    pub auto_stop: u64,
}

#[derive(Debug, Clone)]
pub struct FeaturesConfig {
    pub index_deltas: bool,
    pub streaming_enable: bool,
    pub streaming_deltas: bool,
    pub streaming_traces: bool,
    pub table_accounts: bool,
    pub table_proposals: bool,
    pub table_voters: bool,
}

#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub chain: String,
    pub rpc_url: String,
    pub worker_binary: String,
    pub broker_api_url: String,
    pub broker_vhost: String,
    pub broker_user: String,
    pub broker_pass: String,
    pub index_version: Option<String>,
    pub scaling: ScalingConfig,
    pub indexer: IndexerConfig,
    pub features: FeaturesConfig,
}

impl LocalConfig {
    pub fn load_from_env() -> Result<Self> {
        Ok(Self {
            chain: load_env_var("CHAIN_NAME")?,
            rpc_url: load_env_var("RPC_URL")?,
            worker_binary: load_env_var("WORKER_BINARY")?,
            broker_api_url: load_env_var("BROKER_API_URL")?,
            broker_vhost: load_env_var_or("BROKER_VHOST", "/".to_string())?,
            broker_user: load_env_var("BROKER_USER")?,
            broker_pass: load_env_var("BROKER_PASS")?,
            index_version: std::env::var("INDEX_VERSION").ok(),
            scaling: ScalingConfig {
                readers: load_env_var_or("READERS", 1)?,
                batch_size: load_env_var_or("BATCH_SIZE", 5000)?,
                ds_queues: load_env_var_or("DS_QUEUES", 1)?,
                ds_threads: load_env_var_or("DS_THREADS", 1)?,
                indexing_queues: load_env_var_or("INDEXING_QUEUES", 1)?,
                ad_idx_queues: load_env_var_or("AD_IDX_QUEUES", 1)?,
                ds_pool_size: load_env_var_or("DS_POOL_SIZE", 1)?,
            },
            indexer: IndexerConfig {
                start_on: load_env_var_or("START_ON", 0)?,
                stop_on: load_env_var_or("STOP_ON", 0)?,
                rewrite: load_env_var_or("REWRITE", false)?,
                live_reader: load_env_var_or("LIVE_READER", false)?,
                live_only_mode: load_env_var_or("LIVE_ONLY_MODE", false)?,
                abi_scan_mode: load_env_var_or("ABI_SCAN_MODE", false)?,
                disable_reading: load_env_var_or("DISABLE_READING", false)?,
                purge_queues: load_env_var_or("PURGE_QUEUES", false)?,
                preview: load_env_var_or("PREVIEW", false)?,
                auto_stop: load_env_var_or("AUTO_STOP", 0)?,
            },
            features: FeaturesConfig {
                index_deltas: load_env_var_or("INDEX_DELTAS", true)?,
                streaming_enable: load_env_var_or("STREAMING_ENABLE", false)?,
                streaming_deltas: load_env_var_or("STREAMING_DELTAS", false)?,
                streaming_traces: load_env_var_or("STREAMING_TRACES", false)?,
                table_accounts: load_env_var_or("TABLE_ACCOUNTS", false)?,
                table_proposals: load_env_var_or("TABLE_PROPOSALS", false)?,
                table_voters: load_env_var_or("TABLE_VOTERS", false)?,
            },
        })
    }
}
