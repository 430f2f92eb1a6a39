use crate::domain::prediction::Impact;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Why a materially large movement had no covering prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedReason {
    NoPrecedingNews,
    NoStockMentionExtracted,
    Unclassified,
}

impl MissedReason {
    pub fn label(self) -> &'static str {
        match self {
            MissedReason::NoPrecedingNews => "No preceding news coverage",
            MissedReason::NoStockMentionExtracted => {
                "News present but no stock mention extracted"
            }
            MissedReason::Unclassified => "Unclassified miss",
        }
    }

    fn matches(self, evidence: MissEvidence) -> bool {
        match self {
            MissedReason::NoPrecedingNews => evidence.preceding_news_count == 0,
            MissedReason::NoStockMentionExtracted => {
                evidence.preceding_news_count > 0 && !evidence.stock_mention_found
            }
            MissedReason::Unclassified => true,
        }
    }
}

/// Evidence gathered about the window preceding a missed movement.
#[derive(Debug, Clone, Copy)]
pub struct MissEvidence {
    pub preceding_news_count: i64,
    /// Whether entity extraction found the symbol mentioned in any
    /// preceding article.
    pub stock_mention_found: bool,
}

// Priority-ordered decision table; the first matching row wins. The final
// row matches unconditionally.
const MISSED_REASON_TABLE: &[MissedReason] = &[
    MissedReason::NoPrecedingNews,
    MissedReason::NoStockMentionExtracted,
    MissedReason::Unclassified,
];

pub fn classify_miss(evidence: MissEvidence) -> MissedReason {
    MISSED_REASON_TABLE
        .iter()
        .copied()
        .find(|reason| reason.matches(evidence))
        .unwrap_or(MissedReason::Unclassified)
}

/// Direction/confidence summary of one prediction that preceded a movement.
#[derive(Debug, Clone, Copy)]
pub struct PrecedingPrediction {
    pub predicted_impact: Impact,
    pub confidence: f64,
}

/// 100 when every covering prediction called the movement direction; scaled
/// down by the share of confidence placed on wrong-direction calls; 0 when
/// nothing covered the movement at all.
pub fn retrospective_accuracy(
    movement_percent: f64,
    preceding: &[PrecedingPrediction],
) -> f64 {
    if preceding.is_empty() {
        return 0.0;
    }

    let direction = Impact::from_change_percent(movement_percent, 0.0);
    let mut total_confidence = 0.0;
    let mut matched_confidence = 0.0;
    for p in preceding {
        total_confidence += p.confidence;
        if p.predicted_impact == direction {
            matched_confidence += p.confidence;
        }
    }

    if total_confidence <= 0.0 {
        // All-zero confidence: fall back to the unweighted hit rate.
        let hits = preceding
            .iter()
            .filter(|p| p.predicted_impact == direction)
            .count();
        return 100.0 * hits as f64 / preceding.len() as f64;
    }

    100.0 * matched_confidence / total_confidence
}

/// Append-only audit record for one significant movement window.
#[derive(Debug, Clone, Serialize)]
pub struct RetrospectiveAnalysis {
    pub id: Uuid,
    pub stock_symbol: String,
    pub movement_percent: f64,
    pub analysis_date: NaiveDate,
    pub movement_start_time: DateTime<Utc>,
    pub movement_end_time: DateTime<Utc>,
    pub preceding_news_count: i64,
    pub existing_predictions_count: i64,
    pub missed_opportunity: bool,
    pub missed_reasons: Vec<String>,
    pub retrospective_accuracy: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_news_wins_over_everything() {
        let reason = classify_miss(MissEvidence {
            preceding_news_count: 0,
            stock_mention_found: false,
        });
        assert_eq!(reason, MissedReason::NoPrecedingNews);
        assert_eq!(reason.label(), "No preceding news coverage");
    }

    #[test]
    fn news_without_extracted_mention_is_second_in_priority() {
        let reason = classify_miss(MissEvidence {
            preceding_news_count: 3,
            stock_mention_found: false,
        });
        assert_eq!(reason, MissedReason::NoStockMentionExtracted);
    }

    #[test]
    fn news_with_extracted_mention_falls_through_to_unclassified() {
        let reason = classify_miss(MissEvidence {
            preceding_news_count: 3,
            stock_mention_found: true,
        });
        assert_eq!(reason, MissedReason::Unclassified);
        assert_eq!(reason.label(), "Unclassified miss");
    }

    #[test]
    fn accuracy_is_zero_without_coverage() {
        assert_eq!(retrospective_accuracy(7.5, &[]), 0.0);
    }

    #[test]
    fn accuracy_is_full_when_all_directions_match() {
        let preceding = [
            PrecedingPrediction {
                predicted_impact: Impact::Up,
                confidence: 30.0,
            },
            PrecedingPrediction {
                predicted_impact: Impact::Up,
                confidence: 90.0,
            },
        ];
        assert_eq!(retrospective_accuracy(6.0, &preceding), 100.0);
    }

    #[test]
    fn accuracy_scales_with_confidence_on_mismatches() {
        // 75 points of confidence called UP, 25 called DOWN; movement was up.
        let preceding = [
            PrecedingPrediction {
                predicted_impact: Impact::Up,
                confidence: 75.0,
            },
            PrecedingPrediction {
                predicted_impact: Impact::Down,
                confidence: 25.0,
            },
        ];
        let acc = retrospective_accuracy(8.0, &preceding);
        assert!((acc - 75.0).abs() < 1e-9, "got {acc}");
    }

    #[test]
    fn zero_confidence_coverage_falls_back_to_hit_rate() {
        let preceding = [
            PrecedingPrediction {
                predicted_impact: Impact::Down,
                confidence: 0.0,
            },
            PrecedingPrediction {
                predicted_impact: Impact::Up,
                confidence: 0.0,
            },
        ];
        let acc = retrospective_accuracy(-5.5, &preceding);
        assert!((acc - 50.0).abs() < 1e-9, "got {acc}");
    }
}
