//! API client for communicating with the perf-agent HTTP API

use anyhow::{Context, Result};
use perf_lib::{
    collector::{AggregationType, ExportDocument},
    optimizer::OptimizerStatistics,
    OptimizationResult, OptimizationStrategy, PerformanceMetrics, PerformanceReport,
};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the perf-agent
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn report(&self) -> Result<PerformanceReport> {
        self.get("api/v1/report").await
    }

    pub async fn latest_metrics(&self) -> Result<PerformanceMetrics> {
        self.get("api/v1/metrics/latest").await
    }

    pub async fn aggregate_metrics(
        &self,
        window_secs: i64,
        aggregation: AggregationType,
    ) -> Result<PerformanceMetrics> {
        self.get(&format!(
            "api/v1/metrics/aggregate?window_secs={}&aggregation={}",
            window_secs, aggregation
        ))
        .await
    }

    pub async fn optimizers(&self) -> Result<Vec<OptimizerStatistics>> {
        self.get("api/v1/optimizers").await
    }

    pub async fn optimize(
        &self,
        name: &str,
        strategy: OptimizationStrategy,
    ) -> Result<OptimizationResult> {
        self.post(
            &format!("api/v1/optimizers/{}/optimize", name),
            &OptimizeRequest { strategy },
        )
        .await
    }

    pub async fn export(&self, window_secs: i64) -> Result<ExportDocument> {
        self.get(&format!("api/v1/export?window_secs={}", window_secs))
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub strategy: OptimizationStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
