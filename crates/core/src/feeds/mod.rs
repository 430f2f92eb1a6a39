pub mod http;
pub mod types;

use anyhow::Result;
use chrono::{DateTime, Utc};
use types::{ArticleSummary, PriceMovement};
use uuid::Uuid;

/// Article/price store collaborator. The engine only reads summaries and
/// realized movements; feed parsing and dedup live on the other side of
/// this contract.
#[async_trait::async_trait]
pub trait MarketDataClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Article summaries published in [start, end), optionally restricted
    /// to those tagged with a stock symbol.
    async fn articles_in_window(
        &self,
        symbol: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArticleSummary>>;

    /// Realized percent price change for a symbol over [start, end].
    async fn price_change_percent(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64>;

    /// Candidate movements since `since` whose |percent| meets the
    /// materiality threshold.
    async fn significant_movements(
        &self,
        since: DateTime<Utc>,
        min_abs_percent: f64,
    ) -> Result<Vec<PriceMovement>>;
}

/// Entity-extraction collaborator, used by the retrospective scanner's
/// reason classification.
#[async_trait::async_trait]
pub trait EntityExtractionClient: Send + Sync {
    async fn has_stock_mention(&self, article_id: Uuid, symbol: &str) -> Result<bool>;
}
