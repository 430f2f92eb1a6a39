use chrono::NaiveDate;
use std::fmt;
use uuid::Uuid;

/// Typed engine failures. Carried inside `anyhow::Error` and recovered with
/// `downcast_ref` at the API/worker boundary.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Malformed input, rejected before anything is persisted.
    Validation(String),

    /// A referenced id is absent from the store.
    NotFound { entity: &'static str, id: String },

    /// The prediction has already transitioned to evaluated.
    AlreadyEvaluated { prediction_id: Uuid },

    /// A retrospective analysis for this movement window already exists.
    DuplicateAnalysis {
        stock_symbol: String,
        analysis_date: NaiveDate,
    },

    /// A daily report for this date already exists.
    ReportAlreadyExists { report_date: NaiveDate },

    /// Symbolic horizon token does not match `<count>H` / `<count>D`.
    InvalidTimeWindow { token: String },

    /// Lost a concurrent-update race on a rule/pattern key.
    AggregateUpdateConflict { key: String },

    /// Bounded internal retries were exhausted; the operation may be retried
    /// by the caller.
    TransientFailure { detail: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::AlreadyEvaluated { prediction_id } => {
                write!(f, "prediction already evaluated: {prediction_id}")
            }
            EngineError::DuplicateAnalysis {
                stock_symbol,
                analysis_date,
            } => write!(
                f,
                "retrospective analysis already recorded for {stock_symbol} on {analysis_date}"
            ),
            EngineError::ReportAlreadyExists { report_date } => {
                write!(f, "daily report already exists for {report_date}")
            }
            EngineError::InvalidTimeWindow { token } => {
                write!(f, "invalid time window token: {token:?}")
            }
            EngineError::AggregateUpdateConflict { key } => {
                write!(f, "concurrent update conflict on aggregate key {key}")
            }
            EngineError::TransientFailure { detail } => {
                write!(f, "transient failure: {detail}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Idempotency guards: a caller retrying the same logical operation must
    /// treat these as success-no-op, not as a fatal condition.
    pub fn is_idempotency_guard(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyEvaluated { .. }
                | EngineError::DuplicateAnalysis { .. }
                | EngineError::ReportAlreadyExists { .. }
        )
    }
}

/// Returns the idempotency guard inside `err`, if that is what it is.
pub fn idempotency_guard(err: &anyhow::Error) -> Option<&EngineError> {
    err.downcast_ref::<EngineError>()
        .filter(|e| e.is_idempotency_guard())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_guards_are_recognized_through_anyhow() {
        let err: anyhow::Error = EngineError::ReportAlreadyExists {
            report_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
        }
        .into();
        assert!(idempotency_guard(&err).is_some());

        let err: anyhow::Error = EngineError::Validation("bad".to_string()).into();
        assert!(idempotency_guard(&err).is_none());
    }
}
