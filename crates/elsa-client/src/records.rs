//! Server-side query records: history, saved results and schedules.

use elsa_core::response::lenient_i64;
use elsa_core::QueryPayload;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .map(|v| elsa_core::meta::is_truthy(&v))
        .unwrap_or(false))
}

/// Stored queries keep the JSON-encoded payload in `query`; older records
/// hold a bare query string.
fn decode_query(raw: &str) -> QueryPayload {
    QueryPayload::from_json(raw).unwrap_or_else(|_| QueryPayload::new(raw, Default::default()))
}

/// A page of records as returned by the list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPage<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default, rename = "totalRecords", deserialize_with = "lenient_i64")]
    pub total_records: Option<i64>,
    #[serde(default, rename = "recordsReturned", deserialize_with = "lenient_i64")]
    pub records_returned: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousQuery {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub qid: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub query: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub num_results: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub milliseconds: Option<i64>,
}

impl PreviousQuery {
    pub fn payload(&self) -> QueryPayload {
        decode_query(&self.query)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedQuery {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub qid: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub query: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub num_results: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub comments: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub hash: String,
}

impl SavedQuery {
    pub fn payload(&self) -> QueryPayload {
        decode_query(&self.query)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledQuery {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub query: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub frequency: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub start: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub end: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub action: String,
    #[serde(default)]
    pub action_params: Value,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_alert: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub alert_threshold: Option<i64>,
}

impl ScheduledQuery {
    pub fn query_payload(&self) -> QueryPayload {
        decode_query(&self.query)
    }
}

/// Interval units accepted by `Query/schedule_query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnitCode {
    Year = 1,
    Month = 2,
    Week = 3,
    Day = 4,
    Hour = 5,
    Minute = 6,
}

impl TimeUnitCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl std::str::FromStr for TimeUnitCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_end_matches('s') {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(format!("unknown time unit: {}", other)),
        }
    }
}

/// Form of `Query/schedule_query`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub qid: i64,
    /// Run every `count` `time_unit`s.
    pub count: u32,
    pub time_unit: TimeUnitCode,
    /// Days to keep running; `0` runs forever.
    pub days: u32,
    pub action_id: Value,
}

impl ScheduleRequest {
    pub fn form(&self) -> Vec<(&'static str, String)> {
        let action_id = match &self.action_id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        vec![
            ("qid", self.qid.to_string()),
            ("count", self.count.to_string()),
            ("time_unit", self.time_unit.code().to_string()),
            ("days", self.days.to_string()),
            ("action_id", action_id),
        ]
    }
}

/// Export plugins of `Query/export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Spreadsheet,
    Pdf,
    Csv,
    Html,
}

impl ExportFormat {
    pub fn plugin(self) -> &'static str {
        match self {
            Self::Spreadsheet => "Spreadsheet",
            Self::Pdf => "PDF",
            Self::Csv => "CSV",
            Self::Html => "HTML",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spreadsheet" | "xls" => Ok(Self::Spreadsheet),
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            "html" => Ok(Self::Html),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_previous_queries_page() {
        let page: RecordPage<PreviousQuery> = serde_json::from_value(json!({
            "totalRecords": "2",
            "results": [
                {"qid": "10", "query": "{\"query_string\":\"sshd\",\"query_meta_params\":{\"limit\":10}}",
                 "timestamp": "2012-05-01 10:00:00", "num_results": 4, "milliseconds": "12"},
                {"qid": 11, "query": "plain text", "timestamp": null}
            ]
        }))
        .unwrap();
        assert_eq!(page.total_records, Some(2));
        assert_eq!(page.results[0].qid, Some(10));
        assert_eq!(page.results[0].milliseconds, Some(12));
        assert_eq!(page.results[0].payload().query_string, "sshd");
        assert_eq!(page.results[0].payload().query_meta_params.limit(), Some(10));
        assert_eq!(page.results[1].payload().query_string, "plain text");
        assert_eq!(page.results[1].timestamp, "");
    }

    #[test]
    fn test_scheduled_query_enabled_flag() {
        let q: ScheduledQuery = serde_json::from_value(json!({
            "id": 3, "query": "x", "frequency": "1:0:0:0:0:0", "enabled": "1",
            "action": "Save", "alert_threshold": 0
        }))
        .unwrap();
        assert!(q.enabled);
        assert_eq!(q.alert_threshold, Some(0));
    }

    #[test]
    fn test_schedule_form() {
        let req = ScheduleRequest {
            qid: 5,
            count: 2,
            time_unit: "hours".parse().unwrap(),
            days: 0,
            action_id: json!(1),
        };
        assert_eq!(
            req.form(),
            vec![
                ("qid", "5".to_string()),
                ("count", "2".to_string()),
                ("time_unit", "5".to_string()),
                ("days", "0".to_string()),
                ("action_id", "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_export_plugins() {
        assert_eq!("csv".parse::<ExportFormat>().map(ExportFormat::plugin), Ok("CSV"));
        assert_eq!("PDF".parse::<ExportFormat>().map(ExportFormat::plugin), Ok("PDF"));
        assert!("docx".parse::<ExportFormat>().is_err());
    }
}
