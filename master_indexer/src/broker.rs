use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::config::LocalConfig;
use crate::fleet::index_catalogue;

pub fn block_queue_name(chain: &str, index: u32) -> String {
    format!("{}:blocks:{}", chain, index)
}

pub fn live_queue_name(chain: &str) -> String {
    format!("{}:live_blocks", chain)
}

pub fn index_queue_name(chain: &str, kind: &str, index: u32) -> String {
    format!("{}:index_{}:{}", chain, kind, index)
}

/// Every queue the current configuration will produce into.
pub fn all_queue_names(config: &LocalConfig) -> Vec<String> {
    let mut queues = Vec::new();
    for k in 1..=config.scaling.ds_queues {
        queues.push(block_queue_name(&config.chain, k));
    }
    if config.indexer.live_reader {
        queues.push(live_queue_name(&config.chain));
    }
    for kind in index_catalogue(config) {
        let groups = if kind.name() == "abi" {
            1
        } else {
            config.scaling.indexing_queues
        };
        for group in 1..=groups {
            queues.push(index_queue_name(&config.chain, &kind.name(), group));
        }
    }
    queues
}

/// Empties all run queues through the broker management API.
///
/// Purging while reading is disabled would drop data no reader will ever
/// replace, so that combination is rejected before any queue is touched.
pub async fn purge_queues(config: &LocalConfig) -> Result<()> {
    if config.indexer.disable_reading {
        return Err(anyhow!(
            "Refusing to purge queues while reading is disabled"
        ));
    }

    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .build()
        .context("Failed to build broker http client")?;
    let vhost = if config.broker_vhost == "/" {
        "%2F".to_string()
    } else {
        config.broker_vhost.clone()
    };

    for queue in all_queue_names(config) {
        let url = format!(
            "{}/api/queues/{}/{}/contents",
            config.broker_api_url.trim_end_matches('/'),
            vhost,
            queue
        );
        let response = client
            .delete(&url)
            .basic_auth(&config.broker_user, Some(&config.broker_pass))
            .send()
            .await
            .with_context(|| format!("Failed to purge queue {}", queue))?;

        // Queues that were never declared simply do not exist yet.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(anyhow!(
                "Purge of {} returned {}",
                queue,
                response.status()
            ));
        }
    }
    info!("Purged broker queues");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_patterns() {
        assert_eq!(block_queue_name("wax", 3), "wax:blocks:3");
        assert_eq!(live_queue_name("wax"), "wax:live_blocks");
        assert_eq!(index_queue_name("wax", "action", 2), "wax:index_action:2");
        assert_eq!(
            index_queue_name("wax", "table-accounts", 1),
            "wax:index_table-accounts:1"
        );
    }
}
