use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Summary of the chain node state, as returned by `/v1/chain/get_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_id: String,
    pub head_block_num: u64,
    pub last_irreversible_block_num: u64,
    pub head_block_producer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerScheduleEntry {
    pub producer_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSchedule {
    pub version: u64,
    pub producers: Vec<ProducerScheduleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerSchedule {
    pub active: ActiveSchedule,
}

pub struct ChainRpcClient {
    client: Client,
    url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl ChainRpcClient {
    pub fn new(url: &str, max_retries: u32) -> Self {
        let client = Client::builder()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(None)
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(32)
            .use_rustls_tls()
            .build()
            .unwrap();
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            max_retries,
            retry_delay: Duration::from_millis(1000),
        }
    }

    async fn make_request<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let endpoint = format!("{}{}", self.url, path);
        let mut retries = 0;
        loop {
            match self.client.post(&endpoint).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response.json().await?);
                    } else {
                        info!("Request to {} failed with status: {}", path, response.status());
                    }
                }
                Err(e) => info!("Request error on {}: {:?}", path, e),
            }

            retries += 1;
            if retries >= self.max_retries {
                return Err("Max retries reached".into());
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    pub async fn get_info(&self) -> Result<ChainInfo, Box<dyn std::error::Error>> {
        self.make_request("/v1/chain/get_info").await
    }

    /// Fetches the active producer schedule. Used once at startup to seed
    /// the producer tracker; later updates arrive from the live reader.
    pub async fn get_producer_schedule(
        &self,
    ) -> Result<ProducerSchedule, Box<dyn std::error::Error>> {
        self.make_request("/v1/chain/get_producer_schedule").await
    }

    pub async fn get_head_block(&self) -> Result<u64, Box<dyn std::error::Error>> {
        Ok(self.get_info().await?.head_block_num)
    }
}
