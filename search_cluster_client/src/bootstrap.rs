use anyhow::{anyhow, Context, Result};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;

use crate::SearchClusterClient;

/// Painless source of the `updateByBlock` stored script.
///
/// The script applies a shallow merge of `params` into the target document,
/// guarded by block number: an update is only applied when the stored
/// document is at the same block or older. Keys with a null value are
/// removed from the document instead of being set.
const UPDATE_BY_BLOCK_SOURCE: &str = "\
if (ctx._source.block_num == null || ctx._source.block_num <= params.block_num) {\
  for (entry in params.entrySet()) {\
    if (entry.getValue() == null) { ctx._source.remove(entry.getKey()); }\
    else { ctx._source[entry.getKey()] = entry.getValue(); }\
  }\
} else { ctx.op = 'none'; }";

/// Returns the versioned physical index name for a logical index.
///
/// With a version the pattern is `<chain>-<index>-<version>-000001`; without
/// one the logical name is used directly.
pub fn versioned_index_name(chain: &str, index: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{}-{}-{}-000001", chain, index, v),
        None => format!("{}-{}", chain, index),
    }
}

/// Installs the `updateByBlock` stored script. Not acknowledged is an error.
pub async fn put_update_by_block_script(search: &SearchClusterClient) -> Result<()> {
    let body = json!({
        "script": {
            "lang": "painless",
            "source": UPDATE_BY_BLOCK_SOURCE
        }
    });
    let response = search
        .send_json(Method::POST, "/_scripts/updateByBlock", &body)
        .await?
        .ok_or_else(|| anyhow!("Script endpoint not found"))?;

    if response["acknowledged"].as_bool() != Some(true) {
        return Err(anyhow!("updateByBlock script install was not acknowledged"));
    }
    info!("Installed updateByBlock stored script");
    Ok(())
}

/// Installs the rollover lifecycle policy used by all chain indices.
pub async fn put_lifecycle_policy(search: &SearchClusterClient, max_size_gb: u64) -> Result<()> {
    let body = json!({
        "policy": {
            "phases": {
                "hot": {
                    "actions": {
                        "rollover": { "max_primary_shard_size": format!("{}gb", max_size_gb) },
                        "set_priority": { "priority": 100 }
                    }
                }
            }
        }
    });
    search
        .send_json(Method::PUT, "/_ilm/policy/chain-rollover", &body)
        .await
        .context("Failed to install lifecycle policy")?
        .ok_or_else(|| anyhow!("ILM endpoint not found"))?;
    info!("Installed lifecycle policy chain-rollover");
    Ok(())
}

/// Installs the index template for one logical index
///
/// # Arguments
///
/// * `search` - Search cluster client
/// * `chain` - Chain short name
/// * `index` - Logical index name (e.g. `action`, `block`)
/// * `extra_mappings` - Additional mapping properties appended to the template
pub async fn put_index_template(
    search: &SearchClusterClient,
    chain: &str,
    index: &str,
    extra_mappings: &Value,
) -> Result<()> {
    let mut properties = json!({
        "block_num": { "type": "long" },
        "@timestamp": { "type": "date" }
    });
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra_mappings.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }

    let body = json!({
        "index_patterns": [format!("{}-{}-*", chain, index)],
        "template": {
            "settings": {
                "index.lifecycle.name": "chain-rollover",
                "index.lifecycle.rollover_alias": format!("{}-{}", chain, index)
            },
            "mappings": { "properties": properties }
        }
    });
    search
        .send_json(
            Method::PUT,
            &format!("/_index_template/{}-{}", chain, index),
            &body,
        )
        .await
        .with_context(|| format!("Failed to install index template for {}-{}", chain, index))?
        .ok_or_else(|| anyhow!("Template endpoint not found"))?;
    Ok(())
}

/// Creates the versioned physical index and its logical alias
///
/// The physical index follows the `<chain>-<index>-<version>-000001`
/// pattern and is aliased to `<chain>-<index>` as the write alias. The alias
/// is verified after creation; a missing alias is an error.
pub async fn create_versioned_index_with_alias(
    search: &SearchClusterClient,
    chain: &str,
    index: &str,
    version: Option<&str>,
) -> Result<()> {
    let physical = versioned_index_name(chain, index, version);
    let alias = format!("{}-{}", chain, index);

    // Already created on a previous run.
    if search.get_json(&format!("/{}", physical)).await.is_ok() {
        info!("Index {} already exists", physical);
        return Ok(());
    }

    let mut aliases = serde_json::Map::new();
    aliases.insert(alias.clone(), json!({ "is_write_index": true }));
    let body = json!({ "aliases": aliases });
    search
        .send_json(Method::PUT, &format!("/{}", physical), &body)
        .await
        .with_context(|| format!("Failed to create index {}", physical))?;

    search
        .get_json(&format!("/_alias/{}", alias))
        .await
        .map_err(|_| anyhow!("Alias {} missing after index creation", alias))?;

    info!("Created index {} aliased to {}", physical, alias);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_index_name() {
        assert_eq!(
            versioned_index_name("wax", "action", Some("v1")),
            "wax-action-v1-000001"
        );
        assert_eq!(versioned_index_name("wax", "action", None), "wax-action");
    }

    #[test]
    fn test_update_by_block_script_guard() {
        // The stored script must guard on block_num and support null deletes.
        assert!(UPDATE_BY_BLOCK_SOURCE.contains("ctx._source.block_num <= params.block_num"));
        assert!(UPDATE_BY_BLOCK_SOURCE.contains("ctx._source.remove"));
        assert!(UPDATE_BY_BLOCK_SOURCE.contains("ctx.op = 'none'"));
    }
}
