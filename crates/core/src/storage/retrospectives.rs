use crate::domain::retrospective::RetrospectiveAnalysis;
use crate::error::EngineError;
use anyhow::Context;

/// Persists one analysis. Re-running for the same (symbol, date, movement
/// start) is rejected with DuplicateAnalysis; the stored record is never
/// overwritten.
pub async fn insert(
    pool: &sqlx::PgPool,
    analysis: &RetrospectiveAnalysis,
) -> anyhow::Result<()> {
    let res = sqlx::query(
        "INSERT INTO retrospective_analyses (id, stock_symbol, movement_percent, \
         analysis_date, movement_start_time, movement_end_time, preceding_news_count, \
         existing_predictions_count, missed_opportunity, missed_reasons, \
         retrospective_accuracy, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (stock_symbol, analysis_date, movement_start_time) DO NOTHING",
    )
    .bind(analysis.id)
    .bind(&analysis.stock_symbol)
    .bind(analysis.movement_percent)
    .bind(analysis.analysis_date)
    .bind(analysis.movement_start_time)
    .bind(analysis.movement_end_time)
    .bind(analysis.preceding_news_count)
    .bind(analysis.existing_predictions_count)
    .bind(analysis.missed_opportunity)
    .bind(&analysis.missed_reasons)
    .bind(analysis.retrospective_accuracy)
    .bind(analysis.created_at)
    .execute(pool)
    .await
    .context("insert retrospective_analyses failed")?;

    if res.rows_affected() == 0 {
        return Err(EngineError::DuplicateAnalysis {
            stock_symbol: analysis.stock_symbol.clone(),
            analysis_date: analysis.analysis_date,
        }
        .into());
    }

    Ok(())
}
