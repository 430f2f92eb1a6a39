use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: Uuid,
    pub title: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
}

/// A realized price movement window reported by the price feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceMovement {
    pub stock_symbol: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub percent: f64,
}
