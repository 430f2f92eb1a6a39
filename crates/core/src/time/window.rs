use crate::error::EngineError;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

// Symbolic horizon tokens are `<count><unit>` with unit H (hours) or D (days),
// e.g. "1H", "4H", "1D". Uppercase only.
const MAX_WINDOW_COUNT: i64 = 10_000;

pub fn parse_window(token: &str) -> Result<Duration> {
    let invalid = || EngineError::InvalidTimeWindow {
        token: token.to_string(),
    };

    let trimmed = token.trim();
    let Some(unit) = trimmed.chars().next_back() else {
        return Err(invalid().into());
    };

    let digits = &trimmed[..trimmed.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid().into());
    }

    let count: i64 = digits.parse().map_err(|_| invalid())?;
    if count == 0 || count > MAX_WINDOW_COUNT {
        return Err(invalid().into());
    }

    match unit {
        'H' => Ok(Duration::hours(count)),
        'D' => Ok(Duration::days(count)),
        _ => Err(invalid().into()),
    }
}

/// Concrete evaluation deadline for a prediction anchored at `anchor`.
pub fn resolve_due_at(anchor: DateTime<Utc>, token: &str) -> Result<DateTime<Utc>> {
    Ok(anchor + parse_window(token)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_hour_and_day_tokens() {
        assert_eq!(parse_window("1H").unwrap(), Duration::hours(1));
        assert_eq!(parse_window("4H").unwrap(), Duration::hours(4));
        assert_eq!(parse_window("36H").unwrap(), Duration::hours(36));
        assert_eq!(parse_window("1D").unwrap(), Duration::days(1));
        assert_eq!(parse_window("2D").unwrap(), Duration::days(2));
        // Surrounding whitespace is tolerated.
        assert_eq!(parse_window(" 1D ").unwrap(), Duration::days(1));
    }

    #[test]
    fn rejects_malformed_tokens() {
        for token in ["", "H", "12", "1h", "1d", "1W", "0H", "-1H", "1.5H", "H1", "999999999999H"] {
            let err = parse_window(token).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<EngineError>(),
                    Some(EngineError::InvalidTimeWindow { .. })
                ),
                "expected InvalidTimeWindow for {token:?}"
            );
        }
    }

    #[test]
    fn due_at_is_anchor_plus_window() {
        let anchor = Utc.with_ymd_and_hms(2026, 2, 3, 9, 30, 0).unwrap();
        let due = resolve_due_at(anchor, "4H").unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 2, 3, 13, 30, 0).unwrap());

        let due = resolve_due_at(anchor, "1D").unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 2, 4, 9, 30, 0).unwrap());
    }
}
