use crate::config::Settings;
use crate::feeds::types::{ArticleSummary, PriceMovement};
use crate::feeds::{EntityExtractionClient, MarketDataClient};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

const ARTICLES_PATH: &str = "/v1/articles";
const PRICE_CHANGE_PATH: &str = "/v1/price_change";
const MOVEMENTS_PATH: &str = "/v1/movements";
const STOCK_MENTION_PATH: &str = "/v1/stock_mention";

#[derive(Debug, Clone)]
struct HttpJsonEndpoint {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
}

impl HttpJsonEndpoint {
    fn new(base_url: String, api_key: Option<String>) -> Result<Self> {
        let timeout_secs = std::env::var("FEED_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("FEED_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build feed http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_json_once<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .with_context(|| format!("feed request failed: {path}"))?;

        let status = res.status();
        let text = res.text().await.context("failed to read feed response")?;
        if !status.is_success() {
            anyhow::bail!("feed HTTP {status} for {path}: {text}");
        }

        serde_json::from_str::<T>(&text)
            .with_context(|| format!("failed to parse feed response from {path}: {text}"))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_json_once::<T>(path, query).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(path, attempt, ?backoff, error = %err, "feed fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpMarketDataClient {
    endpoint: HttpJsonEndpoint,
}

impl HttpMarketDataClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_market_data_base_url()?.to_string();
        let api_key = settings.market_data_api_key.clone();
        Ok(Self {
            endpoint: HttpJsonEndpoint::new(base_url, api_key)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ArticlesResponse {
    items: Vec<ArticleSummary>,
}

#[derive(Debug, Deserialize)]
struct PriceChangeResponse {
    percent: f64,
}

#[derive(Debug, Deserialize)]
struct MovementsResponse {
    items: Vec<PriceMovement>,
}

#[async_trait::async_trait]
impl MarketDataClient for HttpMarketDataClient {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn articles_in_window(
        &self,
        symbol: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArticleSummary>> {
        let mut query = vec![
            ("start", start.to_rfc3339()),
            ("end", end.to_rfc3339()),
        ];
        if let Some(symbol) = symbol {
            query.push(("symbol", symbol.to_string()));
        }
        let res: ArticlesResponse = self.endpoint.get_json(ARTICLES_PATH, &query).await?;
        Ok(res.items)
    }

    async fn price_change_percent(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64> {
        let query = [
            ("symbol", symbol.to_string()),
            ("start", start.to_rfc3339()),
            ("end", end.to_rfc3339()),
        ];
        let res: PriceChangeResponse = self.endpoint.get_json(PRICE_CHANGE_PATH, &query).await?;
        Ok(res.percent)
    }

    async fn significant_movements(
        &self,
        since: DateTime<Utc>,
        min_abs_percent: f64,
    ) -> Result<Vec<PriceMovement>> {
        let query = [
            ("since", since.to_rfc3339()),
            ("min_abs_percent", min_abs_percent.to_string()),
        ];
        let res: MovementsResponse = self.endpoint.get_json(MOVEMENTS_PATH, &query).await?;
        Ok(res.items)
    }
}

#[derive(Debug, Clone)]
pub struct HttpEntityExtractionClient {
    endpoint: HttpJsonEndpoint,
}

impl HttpEntityExtractionClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_entity_extraction_base_url()?.to_string();
        let api_key = settings.entity_extraction_api_key.clone();
        Ok(Self {
            endpoint: HttpJsonEndpoint::new(base_url, api_key)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StockMentionResponse {
    mentioned: bool,
}

#[async_trait::async_trait]
impl EntityExtractionClient for HttpEntityExtractionClient {
    async fn has_stock_mention(&self, article_id: Uuid, symbol: &str) -> Result<bool> {
        let query = [
            ("article_id", article_id.to_string()),
            ("symbol", symbol.to_string()),
        ];
        let res: StockMentionResponse =
            self.endpoint.get_json(STOCK_MENTION_PATH, &query).await?;
        Ok(res.mentioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_articles_response_shape() {
        let v = json!({
            "items": [
                {
                    "id": "5f0c938e-54b4-4e3e-bb51-2b8c70a3ce88",
                    "title": "Chipmaker beats estimates",
                    "source": "reuters",
                    "published_at": "2026-02-03T08:30:00Z"
                }
            ]
        });
        let parsed: ArticlesResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].source, "reuters");
    }

    #[test]
    fn parses_movements_response_shape() {
        let v = json!({
            "items": [
                {
                    "stock_symbol": "NVDA",
                    "start_time": "2026-02-03T09:00:00Z",
                    "end_time": "2026-02-03T15:00:00Z",
                    "percent": 7.5
                }
            ]
        });
        let parsed: MovementsResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert!((parsed.items[0].percent - 7.5).abs() < 1e-12);
    }
}
