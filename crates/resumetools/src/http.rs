use async_trait::async_trait;
use resumecore::RunError;

/// Fetches a JSON document. The seam lets tests avoid the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, RunError>;
}

/// `Fetcher` backed by a shared reqwest client
#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, RunError> {
        tracing::info!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RunError::step_failure("fetchData", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        tracing::debug!("Response status: {}", status);
        if !status.is_success() {
            return Err(RunError::step_failure(
                "fetchData",
                format!("{} returned {}", url, status),
            ));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| RunError::step_failure("fetchData", format!("Failed to read response: {}", e)))
    }
}
