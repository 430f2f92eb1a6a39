use crate::config::EngineOptions;
use crate::domain::pattern::Pattern;
use crate::domain::rule::{Rule, RULE_TYPE_CATEGORY_RELIABILITY, RULE_TYPE_SOURCE_RELIABILITY};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One evaluated prediction as the report builder consumes it; also the
/// entry type of the gainer/loser lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatedPrediction {
    pub stock_symbol: String,
    pub actual_change_percent: f64,
    pub accuracy: f64,
}

/// Immutable snapshot for one calendar date, computed over the closed
/// window [00:00, 24:00) UTC of that date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub report_date: NaiveDate,
    pub total_articles: i64,
    pub total_predictions: i64,
    pub average_accuracy: f64,
    pub top_gainers: Vec<EvaluatedPrediction>,
    pub top_losers: Vec<EvaluatedPrediction>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

pub fn build_daily_report(
    report_date: NaiveDate,
    total_articles: i64,
    evaluated: &[EvaluatedPrediction],
    rules: &[Rule],
    patterns: &[Pattern],
    opts: &EngineOptions,
) -> DailyReport {
    let total_predictions = evaluated.len() as i64;
    let average_accuracy = if evaluated.is_empty() {
        0.0
    } else {
        evaluated.iter().map(|e| e.accuracy).sum::<f64>() / evaluated.len() as f64
    };

    let mut by_change: Vec<EvaluatedPrediction> = evaluated.to_vec();
    by_change.sort_by(|a, b| {
        b.actual_change_percent
            .partial_cmp(&a.actual_change_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.stock_symbol.cmp(&b.stock_symbol))
    });

    let top_gainers: Vec<EvaluatedPrediction> =
        by_change.iter().take(opts.top_movers).cloned().collect();
    let top_losers: Vec<EvaluatedPrediction> = by_change
        .iter()
        .rev()
        .take(opts.top_movers)
        .cloned()
        .collect();

    DailyReport {
        report_date,
        total_articles,
        total_predictions,
        average_accuracy,
        top_gainers,
        top_losers,
        insights: build_insights(rules, patterns, opts),
        recommendations: build_recommendations(rules, opts),
    }
}

fn rule_type_label(rule_type: &str) -> &str {
    match rule_type {
        RULE_TYPE_SOURCE_RELIABILITY => "source",
        RULE_TYPE_CATEGORY_RELIABILITY => "category",
        other => other,
    }
}

fn build_insights(rules: &[Rule], patterns: &[Pattern], opts: &EngineOptions) -> Vec<String> {
    let mut out = Vec::new();

    for rule in rules {
        if rule.stats.total_predictions >= opts.min_rule_samples
            && rule.stats.success_rate >= opts.insight_success_rate
        {
            out.push(format!(
                "Reliable {} '{}': {:.0}% success rate over {} predictions",
                rule_type_label(&rule.rule_type),
                rule.rule_value,
                rule.stats.success_rate * 100.0,
                rule.stats.total_predictions,
            ));
        }
    }

    let best_pattern = patterns
        .iter()
        .filter(|p| p.stats.occurrences >= opts.min_pattern_samples)
        .max_by(|a, b| {
            a.stats
                .accuracy
                .partial_cmp(&b.stats.accuracy)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    if let Some(p) = best_pattern {
        out.push(format!(
            "Most reliable combination: {} / {} / {} at {:.0}% accuracy over {} occurrences",
            p.pattern_data.category,
            p.pattern_data.predicted_impact,
            p.pattern_data.time_window,
            p.stats.accuracy,
            p.stats.occurrences,
        ));
    }

    out
}

fn build_recommendations(rules: &[Rule], opts: &EngineOptions) -> Vec<String> {
    let mut out = Vec::new();
    for rule in rules {
        if rule.stats.total_predictions >= opts.min_rule_samples
            && rule.stats.average_accuracy < opts.review_accuracy_floor
        {
            out.push(format!(
                "Review {} '{}': average accuracy {:.0}% over {} predictions",
                rule_type_label(&rule.rule_type),
                rule.rule_value,
                rule.stats.average_accuracy,
                rule.stats.total_predictions,
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pattern::{PatternData, PatternStats, PATTERN_TYPE_PREDICTION_OUTCOME};
    use crate::domain::prediction::Impact;
    use crate::domain::rule::RuleStats;
    use chrono::{TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 3).unwrap()
    }

    fn evaluated(symbol: &str, change: f64, accuracy: f64) -> EvaluatedPrediction {
        EvaluatedPrediction {
            stock_symbol: symbol.to_string(),
            actual_change_percent: change,
            accuracy,
        }
    }

    fn rule(rule_type: &str, value: &str, stats: RuleStats) -> Rule {
        Rule {
            rule_type: rule_type.to_string(),
            rule_value: value.to_string(),
            stats,
            last_updated: Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap(),
        }
    }

    fn stats(total: i64, successful: i64, avg_accuracy: f64) -> RuleStats {
        RuleStats {
            total_predictions: total,
            successful_predictions: successful,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            average_accuracy: avg_accuracy,
            average_change_percent: 0.0,
        }
    }

    #[test]
    fn zero_activity_yields_a_valid_empty_report() {
        let report =
            build_daily_report(date(), 0, &[], &[], &[], &EngineOptions::default());
        assert_eq!(report.total_articles, 0);
        assert_eq!(report.total_predictions, 0);
        assert_eq!(report.average_accuracy, 0.0);
        assert!(report.top_gainers.is_empty());
        assert!(report.top_losers.is_empty());
        assert!(report.insights.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn movers_are_sorted_and_truncated_to_top_five() {
        let rows: Vec<EvaluatedPrediction> = [
            ("AAPL", 3.0),
            ("MSFT", -2.0),
            ("NVDA", 8.0),
            ("TSLA", -6.0),
            ("AMZN", 1.0),
            ("GOOG", 5.0),
            ("META", -1.0),
        ]
        .iter()
        .map(|(s, c)| evaluated(s, *c, 50.0))
        .collect();

        let report = build_daily_report(
            date(),
            10,
            &rows,
            &[],
            &[],
            &EngineOptions::default(),
        );

        let gainers: Vec<&str> = report
            .top_gainers
            .iter()
            .map(|e| e.stock_symbol.as_str())
            .collect();
        assert_eq!(gainers, ["NVDA", "GOOG", "AAPL", "AMZN", "META"]);

        let losers: Vec<&str> = report
            .top_losers
            .iter()
            .map(|e| e.stock_symbol.as_str())
            .collect();
        assert_eq!(losers, ["TSLA", "MSFT", "META", "AMZN", "AAPL"]);
    }

    #[test]
    fn average_accuracy_is_the_mean_over_evaluated_predictions() {
        let evaluated = [
            evaluated("AAPL", 1.0, 90.0),
            evaluated("MSFT", 2.0, 50.0),
            evaluated("NVDA", 3.0, 70.0),
        ];
        let report = build_daily_report(
            date(),
            3,
            &evaluated,
            &[],
            &[],
            &EngineOptions::default(),
        );
        assert!((report.average_accuracy - 70.0).abs() < 1e-12);
    }

    #[test]
    fn reliable_rules_become_insights_only_past_both_thresholds() {
        let rules = [
            rule("SOURCE_RELIABILITY", "reuters", stats(20, 16, 75.0)),
            // High rate but too few samples.
            rule("SOURCE_RELIABILITY", "blog", stats(3, 3, 90.0)),
            // Enough samples but low rate.
            rule("CATEGORY_RELIABILITY", "rumor", stats(30, 9, 45.0)),
        ];
        let report =
            build_daily_report(date(), 0, &[], &rules, &[], &EngineOptions::default());
        assert_eq!(report.insights.len(), 1);
        assert!(report.insights[0].contains("source 'reuters'"));
        assert!(report.insights[0].contains("80%"));
    }

    #[test]
    fn low_accuracy_rules_become_recommendations() {
        let rules = [
            rule("CATEGORY_RELIABILITY", "rumor", stats(12, 2, 25.0)),
            rule("CATEGORY_RELIABILITY", "earnings", stats(12, 9, 80.0)),
        ];
        let report =
            build_daily_report(date(), 0, &[], &rules, &[], &EngineOptions::default());
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("category 'rumor'"));
    }

    #[test]
    fn best_qualifying_pattern_is_surfaced() {
        let make = |occurrences: i64, accuracy: f64, window: &str| Pattern {
            pattern_type: PATTERN_TYPE_PREDICTION_OUTCOME.to_string(),
            pattern_data: PatternData::normalized("earnings", Impact::Up, window),
            stats: PatternStats {
                occurrences,
                accuracy,
                confidence: 60.0,
            },
            low_confidence: occurrences < 5,
            last_seen: Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap(),
        };

        // The 95% pattern is below the sample floor and must be ignored.
        let patterns = [make(2, 95.0, "1H"), make(8, 72.0, "1D"), make(6, 64.0, "4H")];
        let report = build_daily_report(
            date(),
            0,
            &[],
            &[],
            &patterns,
            &EngineOptions::default(),
        );
        assert_eq!(report.insights.len(), 1);
        assert!(report.insights[0].contains("earnings / UP / 1D"));
        assert!(report.insights[0].contains("72%"));
    }
}
