use crate::domain::report::DailyReport;
use crate::error::EngineError;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Writes the one report allowed for its date. A second attempt for the
/// same date fails with ReportAlreadyExists and changes nothing.
pub async fn insert(
    pool: &sqlx::PgPool,
    report: &DailyReport,
    now: DateTime<Utc>,
) -> anyhow::Result<Uuid> {
    let report_data =
        serde_json::to_value(report).context("serialize daily report failed")?;
    let id = Uuid::new_v4();

    let res = sqlx::query(
        "INSERT INTO daily_reports (id, report_date, report_data, total_articles, \
         total_predictions, average_accuracy, generated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (report_date) DO NOTHING",
    )
    .bind(id)
    .bind(report.report_date)
    .bind(report_data)
    .bind(report.total_articles)
    .bind(report.total_predictions)
    .bind(report.average_accuracy)
    .bind(now)
    .execute(pool)
    .await
    .context("insert daily_reports failed")?;

    if res.rows_affected() == 0 {
        return Err(EngineError::ReportAlreadyExists {
            report_date: report.report_date,
        }
        .into());
    }

    Ok(id)
}

pub async fn get_by_date(
    pool: &sqlx::PgPool,
    report_date: NaiveDate,
) -> anyhow::Result<Option<DailyReport>> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT report_data FROM daily_reports WHERE report_date = $1")
            .bind(report_date)
            .fetch_optional(pool)
            .await
            .context("select daily report failed")?;

    row.map(|(data,)| {
        serde_json::from_value::<DailyReport>(data).context("malformed report_data in store")
    })
    .transpose()
}
