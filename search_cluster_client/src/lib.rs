pub mod bootstrap;
pub mod logs_index;
pub mod markers;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

/// HTTP client for the search cluster that backs the indexing pipeline.
///
/// All index, template, script and marker operations go through this client.
/// Credentials are optional; when present they are sent as basic auth on
/// every request.
pub struct SearchClusterClient {
    client: Client,
    url: String,
    user: Option<String>,
    pass: Option<String>,
}

impl SearchClusterClient {
    pub fn new(url: &str, user: Option<String>, pass: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(32)
            .use_rustls_tls()
            .build()
            .context("Failed to build search cluster http client")?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            user,
            pass,
        })
    }

    /// Builds the client from `SEARCH_URL`, `SEARCH_USER` and `SEARCH_PASS`.
    ///
    /// # Environment Variables
    /// * `SEARCH_URL` - Required cluster endpoint
    /// * `SEARCH_USER` / `SEARCH_PASS` - Optional basic auth credentials
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("SEARCH_URL").context("SEARCH_URL is not set")?;
        let user = std::env::var("SEARCH_USER").ok();
        let pass = std::env::var("SEARCH_PASS").ok();
        Self::new(&url, user, pass)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => builder.basic_auth(user, self.pass.as_deref()),
            None => builder,
        }
    }

    pub(crate) async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self
            .with_auth(self.client.get(format!("{}{}", self.url, path)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("GET {} returned {}", path, response.status()));
        }
        Ok(response.json().await?)
    }

    /// Sends a JSON body and returns the parsed response. A 404 is returned
    /// as `Ok(None)` so callers can treat missing indices as "no data".
    pub(crate) async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> Result<Option<Value>> {
        let response = self
            .with_auth(
                self.client
                    .request(method.clone(), format!("{}{}", self.url, path)),
            )
            .json(body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "{} {} returned {}",
                method,
                path,
                response.status()
            ));
        }
        Ok(Some(response.json().await?))
    }

    /// Verifies the cluster is reachable and able to serve requests.
    pub async fn ping(&self) -> Result<()> {
        let health = self.get_json("/_cluster/health").await?;
        let status = health["status"].as_str().unwrap_or("unknown");
        if status == "red" {
            return Err(anyhow!("Search cluster health is red"));
        }
        tracing::info!("Search cluster reachable, health: {}", status);
        Ok(())
    }
}
