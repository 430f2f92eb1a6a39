use crate::error::EngineError;
use crate::time::window;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Floor for the realized-move denominator in the accuracy formula, so a
/// near-flat actual move cannot divide by zero.
pub const ACTUAL_CHANGE_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Impact {
    Up,
    Down,
    Flat,
}

impl Impact {
    pub fn as_str(self) -> &'static str {
        match self {
            Impact::Up => "UP",
            Impact::Down => "DOWN",
            Impact::Flat => "FLAT",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "UP" => Ok(Impact::Up),
            "DOWN" => Ok(Impact::Down),
            "FLAT" => Ok(Impact::Flat),
            other => Err(EngineError::Validation(format!("unknown impact: {other:?}")).into()),
        }
    }

    /// Direction implied by a realized change. Moves inside +/- `flat_band`
    /// count as FLAT.
    pub fn from_change_percent(percent: f64, flat_band: f64) -> Self {
        if percent > flat_band {
            Impact::Up
        } else if percent < -flat_band {
            Impact::Down
        } else {
            Impact::Flat
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incoming prediction, before the ledger assigns an id and deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionDraft {
    pub article_id: Uuid,
    pub stock_symbol: String,
    pub source: String,
    pub category: String,
    pub predicted_impact: Impact,
    pub predicted_change_percent: f64,
    pub confidence: f64,
    pub time_window: String,
}

impl PredictionDraft {
    pub fn validate(&self) -> anyhow::Result<()> {
        let fail = |msg: String| -> anyhow::Error { EngineError::Validation(msg).into() };

        if self.stock_symbol.trim().is_empty() {
            return Err(fail("stock_symbol must be non-empty".to_string()));
        }
        if self.source.trim().is_empty() {
            return Err(fail("source must be non-empty".to_string()));
        }
        if self.category.trim().is_empty() {
            return Err(fail("category must be non-empty".to_string()));
        }
        if !(-100.0..=100.0).contains(&self.predicted_change_percent) {
            return Err(fail(format!(
                "predicted_change_percent must be in [-100, 100] (got {})",
                self.predicted_change_percent
            )));
        }
        if !(0.0..=100.0).contains(&self.confidence) {
            return Err(fail(format!(
                "confidence must be in [0, 100] (got {})",
                self.confidence
            )));
        }

        window::parse_window(&self.time_window)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub id: Uuid,
    pub article_id: Uuid,
    pub stock_symbol: String,
    pub source: String,
    pub category: String,
    pub predicted_impact: Impact,
    pub predicted_change_percent: f64,
    pub confidence: f64,
    pub time_window: String,
    pub created_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub actual_impact: Option<Impact>,
    pub actual_change_percent: Option<f64>,
    pub accuracy: Option<f64>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub aggregates_applied_at: Option<DateTime<Utc>>,
}

impl Prediction {
    pub fn is_evaluated(&self) -> bool {
        self.accuracy.is_some()
    }
}

/// Outcome of evaluating one prediction against realized price movement.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    pub actual_impact: Impact,
    pub actual_change_percent: f64,
    pub accuracy: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// Per-prediction accuracy in [0, 100].
///
/// Direction hit: magnitude error relative to the realized move. Direction
/// miss: capped at 50 and reduced by the absolute magnitude gap, so a
/// wrong-direction call can never outscore a right-direction one.
pub fn score_accuracy(
    predicted_impact: Impact,
    predicted_change_percent: f64,
    actual_impact: Impact,
    actual_change_percent: f64,
) -> f64 {
    let diff = (predicted_change_percent - actual_change_percent).abs();
    if predicted_impact == actual_impact {
        let denom = actual_change_percent.abs().max(ACTUAL_CHANGE_EPSILON);
        100.0 - (diff / denom * 100.0).min(100.0)
    } else {
        (50.0 - diff).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PredictionDraft {
        PredictionDraft {
            article_id: Uuid::new_v4(),
            stock_symbol: "AAPL".to_string(),
            source: "reuters".to_string(),
            category: "earnings".to_string(),
            predicted_impact: Impact::Up,
            predicted_change_percent: 5.0,
            confidence: 80.0,
            time_window: "1D".to_string(),
        }
    }

    #[test]
    fn direction_hit_scores_relative_magnitude_error() {
        // |5.5 - 6.2| / 6.2 * 100 = 11.29..., accuracy = 88.70...
        let s = score_accuracy(Impact::Up, 5.5, Impact::Up, 6.2);
        assert!((s - 88.7).abs() < 0.05, "got {s}");
    }

    #[test]
    fn direction_miss_is_capped_at_fifty() {
        // max(0, 50 - |5 - (-2)|) = 43
        let s = score_accuracy(Impact::Up, 5.0, Impact::Down, -2.0);
        assert!((s - 43.0).abs() < 1e-9, "got {s}");

        // A perfect magnitude with the wrong sign still cannot beat 50.
        let s = score_accuracy(Impact::Up, 0.0, Impact::Down, 0.0);
        assert!((s - 50.0).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn direction_miss_floors_at_zero() {
        let s = score_accuracy(Impact::Up, 80.0, Impact::Down, -30.0);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn near_flat_actual_uses_epsilon_denominator() {
        // denom = max(|0.0|, 0.01); diff 2.0 overwhelms it, clamped to 0.
        let s = score_accuracy(Impact::Flat, 2.0, Impact::Flat, 0.0);
        assert_eq!(s, 0.0);

        // Exact flat call on a flat move is a perfect score.
        let s = score_accuracy(Impact::Flat, 0.0, Impact::Flat, 0.0);
        assert_eq!(s, 100.0);
    }

    #[test]
    fn relative_error_is_clamped_to_one_hundred() {
        let s = score_accuracy(Impact::Up, 90.0, Impact::Up, 1.0);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn impact_from_change_percent_respects_flat_band() {
        assert_eq!(Impact::from_change_percent(1.2, 0.5), Impact::Up);
        assert_eq!(Impact::from_change_percent(-1.2, 0.5), Impact::Down);
        assert_eq!(Impact::from_change_percent(0.3, 0.5), Impact::Flat);
        assert_eq!(Impact::from_change_percent(-0.5, 0.5), Impact::Flat);
    }

    #[test]
    fn draft_validation_accepts_well_formed_input() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn draft_validation_rejects_out_of_range_fields() {
        let mut d = draft();
        d.predicted_change_percent = 150.0;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.confidence = -1.0;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.stock_symbol = "  ".to_string();
        assert!(d.validate().is_err());
    }

    #[test]
    fn draft_validation_rejects_bad_window_token() {
        let mut d = draft();
        d.time_window = "1W".to_string();
        let err = d.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidTimeWindow { .. })
        ));
    }

    #[test]
    fn impact_round_trips_through_text() {
        for impact in [Impact::Up, Impact::Down, Impact::Flat] {
            assert_eq!(Impact::parse(impact.as_str()).unwrap(), impact);
        }
        assert!(Impact::parse("SIDEWAYS").is_err());
    }
}
