//! # Meta Parameters
//!
//! Query-level settings carried next to the query string: time range,
//! grouping, result cap, archive/index execution and connector selection.
//! Stored as a JSON object so unknown keys survive a round trip.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const START: &str = "start";
pub const END: &str = "end";
pub const GROUPBY: &str = "groupby";
pub const CLASS: &str = "class";
pub const LIMIT: &str = "limit";
pub const ARCHIVE: &str = "archive";
pub const ANALYTICS: &str = "analytics";
pub const CONNECTOR: &str = "connector";
pub const CONNECTOR_PARAMS: &str = "connector_params";
pub const GROUPS_ONLY: &str = "groups_only";
pub const LOCAL_GROUPBY: &str = "local_groupby";

/// Result cap of a fresh query.
pub const DEFAULT_LIMIT: u64 = 100;

/// Boolean-ish interpretation of a meta value: `true`, a non-zero number,
/// or a non-empty string other than `"0"`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_unix(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_names(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaParams(Map<String, Value>);

impl MetaParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metas of a freshly created query.
    pub fn with_defaults() -> Self {
        let mut metas = Self::new();
        metas.set(LIMIT, json!(DEFAULT_LIMIT));
        metas
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    pub fn start(&self) -> Option<i64> {
        self.get(START).and_then(as_unix)
    }

    pub fn end(&self) -> Option<i64> {
        self.get(END).and_then(as_unix)
    }

    pub fn limit(&self) -> Option<u64> {
        self.get(LIMIT).and_then(as_unix).and_then(|l| u64::try_from(l).ok())
    }

    pub fn class(&self) -> Option<&str> {
        self.get(CLASS).and_then(Value::as_str)
    }

    pub fn groupby(&self) -> Vec<String> {
        self.get(GROUPBY).map(as_names).unwrap_or_default()
    }

    pub fn set_groupby(&mut self, fields: Vec<String>) {
        self.set(GROUPBY, json!(fields));
    }

    pub fn local_groupby(&self) -> Vec<String> {
        self.get(LOCAL_GROUPBY).map(as_names).unwrap_or_default()
    }

    pub fn groups_only(&self) -> bool {
        self.get(GROUPS_ONLY).map(is_truthy).unwrap_or(false)
    }

    pub fn archive(&self) -> bool {
        self.get(ARCHIVE).map(is_truthy).unwrap_or(false)
    }

    pub fn analytics(&self) -> bool {
        self.get(ANALYTICS).map(is_truthy).unwrap_or(false)
    }

    pub fn connector(&self) -> Option<&str> {
        self.get(CONNECTOR).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for MetaParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Where and how the server executes a query (the Index/Archive menu).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Index,
    Archive,
    IndexAnalytics,
    ArchiveAnalytics,
}

impl SearchMode {
    pub fn apply(self, metas: &mut MetaParams) {
        match self {
            Self::Index => {
                metas.remove(ARCHIVE);
                metas.remove(ANALYTICS);
                metas.remove(CONNECTOR);
                metas.remove(CONNECTOR_PARAMS);
            }
            Self::Archive => {
                metas.set(ARCHIVE, json!(1));
                metas.remove(ANALYTICS);
                metas.remove(CONNECTOR);
                metas.remove(CONNECTOR_PARAMS);
            }
            Self::IndexAnalytics => {
                metas.remove(ARCHIVE);
                metas.set(ANALYTICS, json!(1));
            }
            Self::ArchiveAnalytics => {
                metas.set(ARCHIVE, json!(1));
                metas.set(ANALYTICS, json!(1));
            }
        }
        tracing::debug!("search mode set to {}", self.label());
    }

    pub fn from_metas(metas: &MetaParams) -> Self {
        match (metas.archive(), metas.analytics()) {
            (false, false) => Self::Index,
            (true, false) => Self::Archive,
            (false, true) => Self::IndexAnalytics,
            (true, true) => Self::ArchiveAnalytics,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Index => "Index",
            Self::Archive => "Archive",
            Self::IndexAnalytics => "Index Analytics",
            Self::ArchiveAnalytics => "Archive Analytics",
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "index" => Ok(Self::Index),
            "archive" => Ok(Self::Archive),
            "indexanalytics" => Ok(Self::IndexAnalytics),
            "archiveanalytics" => Ok(Self::ArchiveAnalytics),
            other => Err(format!("unknown search mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_limit() {
        let metas = MetaParams::with_defaults();
        assert_eq!(metas.limit(), Some(DEFAULT_LIMIT));
        assert_eq!(metas.as_map().len(), 1);
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("1")));
        assert!(is_truthy(&json!(true)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("0")));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn test_numeric_accessors_accept_strings() {
        let mut metas = MetaParams::new();
        metas.set(START, json!("1700000000"));
        metas.set(END, json!(1700000060));
        metas.set(LIMIT, json!("1000"));
        assert_eq!(metas.start(), Some(1_700_000_000));
        assert_eq!(metas.end(), Some(1_700_000_060));
        assert_eq!(metas.limit(), Some(1000));
    }

    #[test]
    fn test_groupby_accepts_scalar_or_list() {
        let mut metas = MetaParams::new();
        metas.set(GROUPBY, json!("host"));
        assert_eq!(metas.groupby(), vec!["host"]);
        metas.set_groupby(vec!["srcip".into(), "dstip".into()]);
        assert_eq!(metas.groupby(), vec!["srcip", "dstip"]);
        assert!(metas.local_groupby().is_empty());
    }

    #[test]
    fn test_search_mode_menu_semantics() {
        let mut metas = MetaParams::with_defaults();
        metas.set(CONNECTOR, json!("Sankey"));
        metas.set(CONNECTOR_PARAMS, json!(["a"]));

        SearchMode::IndexAnalytics.apply(&mut metas);
        assert!(metas.analytics());
        assert!(!metas.contains(ARCHIVE));
        assert_eq!(metas.connector(), Some("Sankey"));
        assert_eq!(SearchMode::from_metas(&metas), SearchMode::IndexAnalytics);

        SearchMode::ArchiveAnalytics.apply(&mut metas);
        assert_eq!(SearchMode::from_metas(&metas), SearchMode::ArchiveAnalytics);

        SearchMode::Archive.apply(&mut metas);
        assert!(metas.archive());
        assert!(!metas.contains(ANALYTICS));
        assert!(!metas.contains(CONNECTOR));
        assert!(!metas.contains(CONNECTOR_PARAMS));

        SearchMode::Index.apply(&mut metas);
        assert_eq!(SearchMode::from_metas(&metas), SearchMode::Index);
        assert_eq!(metas.limit(), Some(DEFAULT_LIMIT));
    }

    #[test]
    fn test_search_mode_from_str() {
        assert_eq!("archive".parse::<SearchMode>(), Ok(SearchMode::Archive));
        assert_eq!(
            "Archive Analytics".parse::<SearchMode>(),
            Ok(SearchMode::ArchiveAnalytics)
        );
        assert_eq!("index-analytics".parse::<SearchMode>(), Ok(SearchMode::IndexAnalytics));
        assert!("cold".parse::<SearchMode>().is_err());
    }

    #[test]
    fn test_unknown_keys_round_trip() {
        let raw = json!({"limit": 5, "timeout": 30, "nested": {"a": 1}});
        let metas: MetaParams = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&metas).unwrap(), raw);
    }
}
