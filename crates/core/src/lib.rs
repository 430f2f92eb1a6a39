pub mod domain;
pub mod engine;
pub mod error;
pub mod feeds;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub market_data_base_url: Option<String>,
        pub market_data_api_key: Option<String>,
        pub entity_extraction_base_url: Option<String>,
        pub entity_extraction_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                market_data_base_url: std::env::var("MARKET_DATA_BASE_URL").ok(),
                market_data_api_key: std::env::var("MARKET_DATA_API_KEY").ok(),
                entity_extraction_base_url: std::env::var("ENTITY_EXTRACTION_BASE_URL").ok(),
                entity_extraction_api_key: std::env::var("ENTITY_EXTRACTION_API_KEY").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_market_data_base_url(&self) -> anyhow::Result<&str> {
            self.market_data_base_url
                .as_deref()
                .context("MARKET_DATA_BASE_URL is required")
        }

        pub fn require_entity_extraction_base_url(&self) -> anyhow::Result<&str> {
            self.entity_extraction_base_url
                .as_deref()
                .context("ENTITY_EXTRACTION_BASE_URL is required")
        }
    }

    /// Engine tunables. Defaults match the documented policy; every knob is
    /// overridable from the environment.
    #[derive(Debug, Clone)]
    pub struct EngineOptions {
        /// Accuracy at or above this counts as a successful prediction.
        pub success_threshold: f64,

        /// Minimum |movement percent| that triggers retrospective analysis.
        pub materiality_percent: f64,

        /// How far back to look for covering predictions and news before a
        /// movement window.
        pub lookback_hours: i64,

        /// Realized moves inside +/- this band are treated as FLAT.
        pub flat_band_percent: f64,

        /// Patterns below this occurrence count are flagged low-confidence.
        pub min_pattern_samples: i64,

        /// Rules need at least this many evaluations before they feed
        /// insights or recommendations.
        pub min_rule_samples: i64,

        /// Rule success rate (fraction) at or above which a "reliable"
        /// insight is emitted.
        pub insight_success_rate: f64,

        /// Rule average accuracy below which a review recommendation is
        /// emitted.
        pub review_accuracy_floor: f64,

        /// Number of top gainer/loser entries in the daily report.
        pub top_movers: usize,

        /// Bounded optimistic retries for a contended rule/pattern key.
        pub aggregate_retry_attempts: u32,

        /// How far back a retrospective pass asks the price feed for
        /// significant movements.
        pub movement_scan_hours: i64,
    }

    impl Default for EngineOptions {
        fn default() -> Self {
            Self {
                success_threshold: 60.0,
                materiality_percent: 5.0,
                lookback_hours: 48,
                flat_band_percent: 0.5,
                min_pattern_samples: 5,
                min_rule_samples: 10,
                insight_success_rate: 0.70,
                review_accuracy_floor: 40.0,
                top_movers: 5,
                aggregate_retry_attempts: 5,
                movement_scan_hours: 24,
            }
        }
    }

    impl EngineOptions {
        pub fn from_env() -> Self {
            let mut out = Self::default();

            if let Ok(s) = std::env::var("RULE_SUCCESS_THRESHOLD") {
                if let Ok(n) = s.parse::<f64>() {
                    out.success_threshold = n;
                }
            }
            if let Ok(s) = std::env::var("MATERIALITY_PERCENT") {
                if let Ok(n) = s.parse::<f64>() {
                    out.materiality_percent = n;
                }
            }
            if let Ok(s) = std::env::var("RETRO_LOOKBACK_HOURS") {
                if let Ok(n) = s.parse::<i64>() {
                    out.lookback_hours = n;
                }
            }
            if let Ok(s) = std::env::var("FLAT_BAND_PERCENT") {
                if let Ok(n) = s.parse::<f64>() {
                    out.flat_band_percent = n;
                }
            }
            if let Ok(s) = std::env::var("MIN_PATTERN_SAMPLES") {
                if let Ok(n) = s.parse::<i64>() {
                    out.min_pattern_samples = n;
                }
            }
            if let Ok(s) = std::env::var("MIN_RULE_SAMPLES") {
                if let Ok(n) = s.parse::<i64>() {
                    out.min_rule_samples = n;
                }
            }
            if let Ok(s) = std::env::var("INSIGHT_SUCCESS_RATE") {
                if let Ok(n) = s.parse::<f64>() {
                    out.insight_success_rate = n;
                }
            }
            if let Ok(s) = std::env::var("REVIEW_ACCURACY_FLOOR") {
                if let Ok(n) = s.parse::<f64>() {
                    out.review_accuracy_floor = n;
                }
            }
            if let Ok(s) = std::env::var("REPORT_TOP_MOVERS") {
                if let Ok(n) = s.parse::<usize>() {
                    out.top_movers = n;
                }
            }
            if let Ok(s) = std::env::var("AGGREGATE_RETRY_ATTEMPTS") {
                if let Ok(n) = s.parse::<u32>() {
                    out.aggregate_retry_attempts = n;
                }
            }
            if let Ok(s) = std::env::var("MOVEMENT_SCAN_HOURS") {
                if let Ok(n) = s.parse::<i64>() {
                    out.movement_scan_hours = n;
                }
            }

            out
        }
    }
}
