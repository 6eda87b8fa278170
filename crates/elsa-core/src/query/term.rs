//! Term expression parsing, value quoting and time-window shorthand.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::error::QueryError;

fn operator_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[:<>=]+").expect("operator regex"))
}

fn needs_quotes() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9.\-@_]").expect("quote regex"))
}

fn already_quoted() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^"[^"]+"$"#).expect("quoted literal regex"))
}

/// A `field<op>value` expression split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermExpression {
    pub field: String,
    pub operator: String,
    pub value: String,
}

/// Splits `field<op>value` on the first run of `:`, `<`, `>` or `=`.
///
/// The value ends at the next operator run, so `a=b=c` yields value `b`.
pub fn parse_term_expression(expr: &str) -> Result<TermExpression, QueryError> {
    let re = operator_run();
    let op = re
        .find(expr)
        .ok_or_else(|| QueryError::MalformedTerm(expr.to_string()))?;
    let rest = &expr[op.end()..];
    let value = match re.find(rest) {
        Some(next) => &rest[..next.start()],
        None => rest,
    };
    Ok(TermExpression {
        field: expr[..op.start()].to_string(),
        operator: op.as_str().to_string(),
        value: value.to_string(),
    })
}

/// Wraps `value` in double quotes when it holds anything outside
/// `[A-Za-z0-9.-@_]` and is not already a quoted literal.
pub fn quote_value(value: &str) -> String {
    if needs_quotes().is_match(value) && !already_quoted().is_match(value) {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

/// Pseudo-fields that set the time range instead of adding a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Timestamp,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn from_field(name: &str) -> Option<Self> {
        match name {
            "timestamp" => Some(Self::Timestamp),
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            _ => None,
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            Self::Timestamp => 1,
            Self::Minute => 60,
            Self::Hour => 3600,
            Self::Day => 86400,
        }
    }
}

/// Parses a user-supplied point in time. Surrounding quotes are ignored and
/// times without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, QueryError> {
    let s = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(secs) = s.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(dt);
        }
    }
    Err(QueryError::InvalidTime(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_expression() {
        let t = parse_term_expression("srcip=10.0.0.1").unwrap();
        assert_eq!(t.field, "srcip");
        assert_eq!(t.operator, "=");
        assert_eq!(t.value, "10.0.0.1");
    }

    #[test]
    fn test_parse_comparator_runs() {
        let t = parse_term_expression("SNORT.sig_priority>=2").unwrap();
        assert_eq!(t.field, "SNORT.sig_priority");
        assert_eq!(t.operator, ">=");
        assert_eq!(t.value, "2");

        let t = parse_term_expression("host:web01").unwrap();
        assert_eq!(t.operator, ":");

        let t = parse_term_expression("a==b").unwrap();
        assert_eq!(t.operator, "==");
        assert_eq!(t.value, "b");
    }

    #[test]
    fn test_value_stops_at_next_operator() {
        let t = parse_term_expression("a=b=c").unwrap();
        assert_eq!(t.value, "b");
    }

    #[test]
    fn test_expression_without_operator_is_malformed() {
        assert_eq!(
            parse_term_expression("hostname"),
            Err(QueryError::MalformedTerm("hostname".into()))
        );
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_value("a b"), "\"a b\"");
        assert_eq!(quote_value("10.0.0.1"), "10.0.0.1");
        assert_eq!(quote_value("user@host_1-x"), "user@host_1-x");
        assert_eq!(quote_value("\"a b\""), "\"a b\"");
        assert_eq!(quote_value("a/b"), "\"a/b\"");
        // an empty quoted literal is not "already quoted"
        assert_eq!(quote_value("\"\""), "\"\"\"\"");
    }

    #[test]
    fn test_time_units() {
        assert_eq!(TimeUnit::from_field("minute").map(TimeUnit::seconds), Some(60));
        assert_eq!(TimeUnit::from_field("day").map(TimeUnit::seconds), Some(86400));
        assert_eq!(TimeUnit::from_field("program"), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = 1_700_000_000;
        for raw in [
            "2023-11-14T22:13:20Z",
            "2023-11-14T22:13:20+00:00",
            "2023-11-14 22:13:20",
            "\"2023-11-14 22:13:20\"",
            "2023-11-14T22:13:20",
            "1700000000",
        ] {
            assert_eq!(parse_timestamp(raw).unwrap().timestamp(), expected, "{raw}");
        }
        assert_eq!(parse_timestamp("2023-11-14").unwrap().timestamp(), 1_699_920_000);
        assert!(matches!(parse_timestamp("yesterday"), Err(QueryError::InvalidTime(_))));
    }
}
