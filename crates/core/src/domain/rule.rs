use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

pub const RULE_TYPE_SOURCE_RELIABILITY: &str = "SOURCE_RELIABILITY";
pub const RULE_TYPE_CATEGORY_RELIABILITY: &str = "CATEGORY_RELIABILITY";

/// Identity of an aggregate accuracy statistic: a rule type plus the
/// categorical value it is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKey {
    SourceReliability(String),
    CategoryReliability(String),
}

impl RuleKey {
    pub fn rule_type(&self) -> &'static str {
        match self {
            RuleKey::SourceReliability(_) => RULE_TYPE_SOURCE_RELIABILITY,
            RuleKey::CategoryReliability(_) => RULE_TYPE_CATEGORY_RELIABILITY,
        }
    }

    pub fn rule_value(&self) -> &str {
        match self {
            RuleKey::SourceReliability(v) | RuleKey::CategoryReliability(v) => v,
        }
    }

    /// Rule keys an evaluated prediction contributes to.
    pub fn for_prediction(source: &str, category: &str) -> Vec<RuleKey> {
        vec![
            RuleKey::SourceReliability(source.trim().to_string()),
            RuleKey::CategoryReliability(category.trim().to_string()),
        ]
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.rule_type(), self.rule_value())
    }
}

/// Running statistics for one rule key. Only (count, mean) pairs are kept;
/// no per-evaluation history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RuleStats {
    pub total_predictions: i64,
    pub successful_predictions: i64,
    pub success_rate: f64,
    pub average_accuracy: f64,
    pub average_change_percent: f64,
}

impl RuleStats {
    /// Fold one evaluated prediction into the statistics.
    pub fn apply(self, accuracy: f64, change_percent: f64, success: bool) -> RuleStats {
        let total = self.total_predictions + 1;
        let successful = self.successful_predictions + i64::from(success);
        RuleStats {
            total_predictions: total,
            successful_predictions: successful,
            success_rate: successful as f64 / total as f64,
            average_accuracy: running_mean(
                self.average_accuracy,
                self.total_predictions,
                accuracy,
            ),
            average_change_percent: running_mean(
                self.average_change_percent,
                self.total_predictions,
                change_percent,
            ),
        }
    }
}

// new_avg = old_avg + (value - old_avg) / (old_count + 1)
fn running_mean(old_avg: f64, old_count: i64, value: f64) -> f64 {
    old_avg + (value - old_avg) / (old_count + 1) as f64
}

#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub rule_type: String,
    pub rule_value: String,
    #[serde(flatten)]
    pub stats: RuleStats,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_stats_have_zero_success_rate() {
        let stats = RuleStats::default();
        assert_eq!(stats.total_predictions, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn success_rate_always_equals_successful_over_total() {
        let mut stats = RuleStats::default();
        let outcomes = [true, false, true, true, false, false, true];
        for (i, success) in outcomes.iter().enumerate() {
            stats = stats.apply(50.0, 1.0, *success);
            let expected =
                stats.successful_predictions as f64 / stats.total_predictions as f64;
            assert!(
                (stats.success_rate - expected).abs() < 1e-12,
                "after {} evaluations",
                i + 1
            );
        }
        assert_eq!(stats.total_predictions, 7);
        assert_eq!(stats.successful_predictions, 4);
    }

    #[test]
    fn running_mean_matches_arithmetic_mean_in_any_order() {
        let values = [88.7, 43.0, 12.5, 100.0, 0.0, 66.6, 91.2, 55.5];
        let true_mean = values.iter().sum::<f64>() / values.len() as f64;

        let mut forward = RuleStats::default();
        for v in values {
            forward = forward.apply(v, 0.0, false);
        }
        assert!((forward.average_accuracy - true_mean).abs() < 1e-9);

        let mut reversed = RuleStats::default();
        for v in values.iter().rev() {
            reversed = reversed.apply(*v, 0.0, false);
        }
        assert!((reversed.average_accuracy - true_mean).abs() < 1e-9);
    }

    #[test]
    fn change_percent_mean_tracks_independently() {
        let mut stats = RuleStats::default();
        stats = stats.apply(80.0, 4.0, true);
        stats = stats.apply(20.0, -2.0, false);
        assert!((stats.average_accuracy - 50.0).abs() < 1e-12);
        assert!((stats.average_change_percent - 1.0).abs() < 1e-12);
    }

    #[test]
    fn keys_for_prediction_cover_source_and_category() {
        let keys = RuleKey::for_prediction(" reuters ", "earnings");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].rule_type(), RULE_TYPE_SOURCE_RELIABILITY);
        assert_eq!(keys[0].rule_value(), "reuters");
        assert_eq!(keys[1].rule_type(), RULE_TYPE_CATEGORY_RELIABILITY);
        assert_eq!(keys[1].rule_value(), "earnings");
    }
}
