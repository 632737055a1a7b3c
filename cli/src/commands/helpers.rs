use anyhow::{Context, Result, bail};
use chrono::{Local, TimeZone};

use tend_core::models::{is_date_key, shift_date_key, today_key};

/// Resolve an optional date argument to a canonical date key. Accepts
/// `YYYY-MM-DD` plus the `today`/`yesterday` shortcuts; defaults to today.
pub(crate) fn parse_date_key(date: Option<String>) -> Result<String> {
    match date {
        None => Ok(today_key()),
        Some(s) => match s.as_str() {
            "today" => Ok(today_key()),
            "yesterday" => shift_date_key(&today_key(), -1),
            _ => {
                if is_date_key(&s) {
                    Ok(s)
                } else {
                    bail!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday")
                }
            }
        },
    }
}

/// Render an epoch-ms timestamp as local date-time for display.
pub(crate) fn format_ms(ts_ms: i64) -> Result<String> {
    let dt = Local
        .timestamp_millis_opt(ts_ms)
        .single()
        .context("timestamp out of range")?;
    Ok(dt.format("%Y-%m-%d %H:%M").to_string())
}

pub(crate) fn check_mark(b: bool) -> &'static str {
    if b { "x" } else { "-" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_key_default_is_today() {
        assert_eq!(parse_date_key(None).unwrap(), today_key());
        assert_eq!(parse_date_key(Some("today".to_string())).unwrap(), today_key());
    }

    #[test]
    fn test_parse_date_key_yesterday() {
        assert_eq!(
            parse_date_key(Some("yesterday".to_string())).unwrap(),
            shift_date_key(&today_key(), -1).unwrap()
        );
    }

    #[test]
    fn test_parse_date_key_iso() {
        assert_eq!(
            parse_date_key(Some("2024-01-15".to_string())).unwrap(),
            "2024-01-15"
        );
    }

    #[test]
    fn test_parse_date_key_invalid() {
        assert!(parse_date_key(Some("nope".to_string())).is_err());
        assert!(parse_date_key(Some("2024-1-15".to_string())).is_err());
    }

    #[test]
    fn test_format_ms() {
        let s = format_ms(1_700_000_000_000).unwrap();
        assert_eq!(s.len(), 16);
        assert!(s.starts_with("2023-11-1"));
    }

    #[test]
    fn test_check_mark() {
        assert_eq!(check_mark(true), "x");
        assert_eq!(check_mark(false), "-");
    }
}
