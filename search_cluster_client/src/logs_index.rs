use anyhow::Result;
use reqwest::Method;
use serde::Serialize;
use serde_json::json;

use crate::SearchClusterClient;

/// Payload of a missed-round event written to the `<chain>-logs` index.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MissedBlocksDoc {
    pub producer: String,
    pub last_block: u64,
    pub size: u64,
    pub schedule_version: u64,
}

/// Writes one `missed_blocks` document to the chain log index
///
/// # Arguments
///
/// * `search` - Search cluster client
/// * `chain` - Chain short name
/// * `doc` - The missed-round payload
pub async fn log_missed_blocks(
    search: &SearchClusterClient,
    chain: &str,
    doc: &MissedBlocksDoc,
) -> Result<()> {
    let body = json!({
        "type": "missed_blocks",
        "@timestamp": chrono::Utc::now().to_rfc3339(),
        "missed_blocks": doc
    });
    search
        .send_json(Method::POST, &format!("/{}-logs/_doc", chain), &body)
        .await?;
    Ok(())
}
