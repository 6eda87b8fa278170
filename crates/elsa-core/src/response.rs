//! # Query Responses
//!
//! Decoding of the `Query/query` (and `Query/get_saved_result`) body and the
//! binding of a loaded response to what a tab displays: raw rows, grouped
//! count tables, or a batch notice.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::grouping::aggregate_local;
use crate::meta::{is_truthy, MetaParams};
use crate::payload::QueryPayload;
use crate::query::parse_timestamp;
use crate::session::FailureReason;

/// Integer that may arrive as a JSON number or a numeric string.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `deserialize_with` helper for [`value_as_i64`] fields.
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_i64))
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lenient_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items.iter().map(value_as_text).collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    })
}

fn lenient_messages<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items.iter().map(value_as_text).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![value_as_text(&other)],
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Value,
    #[serde(default, rename = "totalRecords", deserialize_with = "lenient_i64")]
    pub total_records: Option<i64>,
    #[serde(default, deserialize_with = "lenient_names")]
    pub groupby: Vec<String>,
    /// Present on saved results; replaces what the session believes it sent.
    #[serde(default)]
    pub query_string: Option<String>,
    #[serde(default)]
    pub query_meta_params: Option<MetaParams>,
    #[serde(default, deserialize_with = "lenient_messages")]
    pub errors: Vec<String>,
    #[serde(default, deserialize_with = "lenient_messages")]
    pub warnings: Vec<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub qid: Option<i64>,
    #[serde(default)]
    pub batch_query: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// How a decoded response moves its session.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    Error(String),
    Batch(i64),
    Loaded,
}

impl QueryResponse {
    /// Decodes a response body. Empty and non-JSON bodies are failures.
    pub fn parse(text: &str) -> Result<Self, FailureReason> {
        if text.trim().is_empty() {
            return Err(FailureReason::EmptyResponse);
        }
        serde_json::from_str(text)
            .map_err(|e| FailureReason::Malformed(format!("Could not parse responseText: {}", e)))
    }

    pub fn classify(&self) -> ResponseKind {
        if let Some(error) = self.error.as_ref().filter(|e| is_truthy(e)) {
            return ResponseKind::Error(value_as_text(error));
        }
        if let Some(batch) = self.batch_query.as_ref().filter(|b| is_truthy(b)) {
            return match value_as_i64(batch) {
                Some(id) => ResponseKind::Batch(id),
                None => ResponseKind::Error(format!("Unexpected batch id {}", batch)),
            };
        }
        ResponseKind::Loaded
    }

    /// Group-by fields the server applied, falling back to its echoed metas.
    pub fn effective_groupby(&self) -> Vec<String> {
        if !self.groupby.is_empty() {
            return self.groupby.clone();
        }
        self.query_meta_params
            .as_ref()
            .map(MetaParams::groupby)
            .unwrap_or_default()
    }

    /// The query this response answers, when the server sent one back.
    pub fn echoed_payload(&self) -> Option<QueryPayload> {
        self.query_string.as_ref().map(|qs| {
            QueryPayload::new(
                qs.clone(),
                self.query_meta_params.clone().unwrap_or_default(),
            )
        })
    }

    pub fn rows(&self) -> Vec<LogRow> {
        match &self.results {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_object().cloned().map(LogRow))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Group rows the server returned for `field`.
    pub fn group_table(&self, field: &str) -> GroupTable {
        let rows = self
            .results
            .get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| GroupRow {
                        value: item.get("@groupby").map(value_as_text).unwrap_or_default(),
                        count: item
                            .get("@count")
                            .and_then(value_as_i64)
                            .and_then(|c| u64::try_from(c).ok())
                            .unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default();
        GroupTable::new(field, rows)
    }
}

/// One raw log record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRow(pub Map<String, Value>);

impl LogRow {
    pub fn id(&self) -> Option<i64> {
        self.0.get("id").and_then(value_as_i64)
    }

    pub fn msg(&self) -> Option<&str> {
        self.0.get("msg").and_then(Value::as_str)
    }

    /// Sort key for the default ascending timestamp order.
    pub fn timestamp(&self) -> Option<i64> {
        let raw = self.0.get("timestamp")?;
        value_as_i64(raw).or_else(|| {
            raw.as_str()
                .and_then(|s| parse_timestamp(s).ok())
                .map(|dt| dt.timestamp())
        })
    }

    /// Looks `name` up among the top-level columns, then the parsed
    /// `_fields` list.
    pub fn field_value(&self, name: &str) -> Option<String> {
        if name != "_fields" {
            if let Some(v) = self.0.get(name) {
                return Some(value_as_text(v));
            }
        }
        self.0
            .get("_fields")?
            .as_array()?
            .iter()
            .find(|f| f.get("field").and_then(Value::as_str) == Some(name))
            .and_then(|f| f.get("value"))
            .map(value_as_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRow {
    #[serde(rename = "groupby")]
    pub value: String,
    pub count: u64,
}

/// Counts per distinct value of one field, largest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupTable {
    pub field: String,
    pub rows: Vec<GroupRow>,
}

impl GroupTable {
    pub fn new(field: impl Into<String>, mut rows: Vec<GroupRow>) -> Self {
        rows.sort_by(|a, b| b.count.cmp(&a.count));
        Self {
            field: field.into(),
            rows,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub rows: Vec<LogRow>,
    pub total_records: Option<i64>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// What a tab shows for a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultBinding {
    Rows(RowSet),
    Grouped { tables: Vec<GroupTable>, local: bool },
    Batch { batch_id: i64 },
}

impl ResultBinding {
    /// Binds a loaded response. Server-side grouping wins over a local
    /// group-by carried in `sent`.
    pub fn bind(response: &QueryResponse, sent: &QueryPayload) -> Self {
        if let ResponseKind::Batch(batch_id) = response.classify() {
            return Self::Batch { batch_id };
        }

        let groupby = response.effective_groupby();
        if !groupby.is_empty() {
            let tables = groupby.iter().map(|f| response.group_table(f)).collect();
            return Self::Grouped {
                tables,
                local: false,
            };
        }

        let mut rows = response.rows();
        let local = sent.local_groupby();
        if !local.is_empty() {
            let tables = local.iter().map(|f| aggregate_local(&rows, f)).collect();
            return Self::Grouped {
                tables,
                local: true,
            };
        }

        rows.sort_by_key(|r| r.timestamp());
        Self::Rows(RowSet {
            rows,
            total_records: response.total_records,
            errors: response.errors.clone(),
            warnings: response.warnings.clone(),
        })
    }

    pub fn group_fields(&self) -> Vec<&str> {
        match self {
            Self::Grouped { tables, .. } => tables.iter().map(|t| t.field.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}
