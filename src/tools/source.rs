use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::config::DataSourcesConfig;
use crate::error::{AssistantError, DataSourceError};
use crate::models::{Pool, SearchHit, StableCoin};

use super::pools::parse_pools;
use super::prices::parse_prices;
use super::search::parse_search;
use super::stablecoins::parse_stablecoins;

#[cfg(test)]
use mockall::automock;

/// The third-party data the assistant's tools can reach. One attempt per
/// call; every failure comes back as a `DataSourceError`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    async fn top_stablecoins(&self, limit: usize) -> Result<Vec<StableCoin>, DataSourceError>;

    async fn top_pools(&self, limit: usize) -> Result<Vec<Pool>, DataSourceError>;

    async fn stablecoin_prices(&self) -> Result<Value, DataSourceError>;

    async fn web_search(
        &self,
        query: &str,
        region: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, DataSourceError>;
}

/// DefiLlama registries plus DuckDuckGo's HTML search over plain HTTP
pub struct HttpDataSources {
    client: Client,
    urls: DataSourcesConfig,
}

impl HttpDataSources {
    pub fn new(cfg: &DataSourcesConfig) -> Result<Self, AssistantError> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AssistantError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, cfg.clone()))
    }

    pub fn with_client(client: Client, urls: DataSourcesConfig) -> Self {
        Self { client, urls }
    }

    async fn get_body(
        &self,
        request: reqwest::RequestBuilder,
        accept: &'static str,
    ) -> Result<String, DataSourceError> {
        let response = request
            .header(ACCEPT, accept)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    async fn fetch(&self, url: &str) -> Result<Value, DataSourceError> {
        tracing::debug!(%url, "Fetching data source");
        let body = self
            .get_body(self.client.get(url), "application/json")
            .await
            .inspect_err(|e| tracing::warn!(%url, error = %e, "Data source request failed"))?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl DataSource for HttpDataSources {
    async fn top_stablecoins(&self, limit: usize) -> Result<Vec<StableCoin>, DataSourceError> {
        let payload = self.fetch(&self.urls.stablecoins_url).await?;
        parse_stablecoins(&payload, limit)
    }

    async fn top_pools(&self, limit: usize) -> Result<Vec<Pool>, DataSourceError> {
        let payload = self.fetch(&self.urls.pools_url).await?;
        parse_pools(&payload, limit)
    }

    async fn stablecoin_prices(&self) -> Result<Value, DataSourceError> {
        let payload = self.fetch(&self.urls.prices_url).await?;
        parse_prices(payload)
    }

    async fn web_search(
        &self,
        query: &str,
        region: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, DataSourceError> {
        if query.trim().is_empty() {
            return Err(DataSourceError::EmptyQuery);
        }

        tracing::debug!(url = %self.urls.search_url, %query, %region, "Running web search");
        let request = self
            .client
            .get(&self.urls.search_url)
            .query(&[("q", query), ("kl", region)]);
        let page = self
            .get_body(request, "text/html")
            .await
            .inspect_err(|e| tracing::warn!(%query, error = %e, "Web search failed"))?;
        parse_search(&page, max_results)
    }
}
