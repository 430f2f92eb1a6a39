use crate::domain::prediction::Impact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const PATTERN_TYPE_PREDICTION_OUTCOME: &str = "PREDICTION_OUTCOME";

/// Attribute bag identifying a recurring prediction shape. Always built via
/// `normalized` so equal combinations map to the same stored key regardless
/// of input casing or whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternData {
    pub category: String,
    pub predicted_impact: Impact,
    pub time_window: String,
}

impl PatternData {
    pub fn normalized(category: &str, predicted_impact: Impact, time_window: &str) -> Self {
        Self {
            category: category.trim().to_lowercase(),
            predicted_impact,
            time_window: time_window.trim().to_uppercase(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "category": self.category,
            "predicted_impact": self.predicted_impact.as_str(),
            "time_window": self.time_window,
        })
    }
}

/// Running statistics for one pattern: (count, mean) pairs only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternStats {
    pub occurrences: i64,
    pub accuracy: f64,
    pub confidence: f64,
}

impl PatternStats {
    /// Seed from a single qualifying sample.
    pub fn seed(accuracy: f64, confidence: f64) -> Self {
        Self {
            occurrences: 1,
            accuracy,
            confidence,
        }
    }

    /// Fold one more qualifying sample into the running means.
    pub fn apply(self, accuracy: f64, confidence: f64) -> Self {
        let next = self.occurrences + 1;
        Self {
            occurrences: next,
            accuracy: self.accuracy + (accuracy - self.accuracy) / next as f64,
            confidence: self.confidence + (confidence - self.confidence) / next as f64,
        }
    }

    pub fn is_low_confidence(&self, min_samples: i64) -> bool {
        self.occurrences < min_samples
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pattern {
    pub pattern_type: String,
    pub pattern_data: PatternData,
    #[serde(flatten)]
    pub stats: PatternStats,
    /// Below the minimum sample count; consumers should not lean on it yet.
    pub low_confidence: bool,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_makes_equal_bags_equal() {
        let a = PatternData::normalized(" Earnings ", Impact::Up, "1d ");
        let b = PatternData::normalized("earnings", Impact::Up, "1D");
        assert_eq!(a, b);
        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn distinct_attributes_stay_distinct() {
        let a = PatternData::normalized("earnings", Impact::Up, "1D");
        let b = PatternData::normalized("earnings", Impact::Down, "1D");
        let c = PatternData::normalized("earnings", Impact::Up, "4H");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn seed_then_apply_tracks_running_means() {
        let stats = PatternStats::seed(80.0, 60.0);
        assert_eq!(stats.occurrences, 1);

        let stats = stats.apply(40.0, 80.0);
        assert_eq!(stats.occurrences, 2);
        assert!((stats.accuracy - 60.0).abs() < 1e-12);
        assert!((stats.confidence - 70.0).abs() < 1e-12);

        let stats = stats.apply(90.0, 70.0);
        assert_eq!(stats.occurrences, 3);
        assert!((stats.accuracy - 70.0).abs() < 1e-12);
        assert!((stats.confidence - 70.0).abs() < 1e-12);
    }

    #[test]
    fn low_confidence_until_min_samples_reached() {
        let mut stats = PatternStats::seed(50.0, 50.0);
        assert!(stats.is_low_confidence(5));
        for _ in 0..4 {
            stats = stats.apply(50.0, 50.0);
        }
        assert_eq!(stats.occurrences, 5);
        assert!(!stats.is_low_confidence(5));
    }
}
