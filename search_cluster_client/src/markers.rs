use anyhow::Result;
use reqwest::Method;
use serde_json::{json, Value};

use crate::SearchClusterClient;

/// Extracts the `block_num` of the first hit of a search response.
fn first_hit_block_num(response: &Value) -> Option<u64> {
    response["hits"]["hits"]
        .as_array()
        .and_then(|hits| hits.first())
        .and_then(|hit| hit["_source"]["block_num"].as_u64())
}

/// Retrieves the highest indexed block number for the chain
///
/// Queries the `<chain>-block` alias sorted by `block_num` descending. A
/// missing index or an empty result means nothing has been indexed yet.
///
/// # Arguments
///
/// * `search` - Search cluster client
/// * `chain` - Chain short name
///
/// # Returns
///
/// * `Result<Option<u64>>` - The last indexed block number, if any
pub async fn get_last_indexed_block(
    search: &SearchClusterClient,
    chain: &str,
) -> Result<Option<u64>> {
    let body = json!({
        "size": 1,
        "sort": [{ "block_num": { "order": "desc" } }]
    });
    let response = search
        .send_json(Method::POST, &format!("/{}-block/_search", chain), &body)
        .await?;
    Ok(response.as_ref().and_then(first_hit_block_num))
}

/// Retrieves the highest block number covered by the ABI scan
///
/// Same probe as [`get_last_indexed_block`], but against the `<chain>-abi`
/// alias. Used as the starting point when the controller runs in ABI scan
/// mode.
pub async fn get_last_indexed_abi_block(
    search: &SearchClusterClient,
    chain: &str,
) -> Result<Option<u64>> {
    let body = json!({
        "size": 1,
        "sort": [{ "block": { "order": "desc" } }]
    });
    let response = search
        .send_json(Method::POST, &format!("/{}-abi/_search", chain), &body)
        .await?;
    Ok(response
        .as_ref()
        .and_then(|r| {
            r["hits"]["hits"]
                .as_array()
                .and_then(|hits| hits.first())
                .and_then(|hit| hit["_source"]["block"].as_u64())
        }))
}

/// Finds the highest indexed block inside `[first_block, last_block]`
///
/// Used to detect already-indexed data ahead of a configured start override,
/// so a restart does not re-index a range that was already covered.
pub async fn find_indexed_block_in_range(
    search: &SearchClusterClient,
    chain: &str,
    first_block: u64,
    last_block: u64,
) -> Result<Option<u64>> {
    let body = json!({
        "size": 1,
        "sort": [{ "block_num": { "order": "desc" } }],
        "query": {
            "range": {
                "block_num": { "gte": first_block, "lte": last_block }
            }
        }
    });
    let response = search
        .send_json(Method::POST, &format!("/{}-block/_search", chain), &body)
        .await?;
    Ok(response.as_ref().and_then(first_hit_block_num))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_hit_block_num() {
        let response = json!({
            "hits": {
                "total": { "value": 1 },
                "hits": [
                    { "_index": "wax-block-v1-000001", "_source": { "block_num": 123456 } }
                ]
            }
        });
        assert_eq!(first_hit_block_num(&response), Some(123456));
    }

    #[test]
    fn test_first_hit_block_num_empty() {
        let response = json!({ "hits": { "total": { "value": 0 }, "hits": [] } });
        assert_eq!(first_hit_block_num(&response), None);
    }
}
