//! # Query Payload
//!
//! The canonical wire form of a query: `{query_string, query_meta_params}`.
//! Sent JSON-encoded as the `q` parameter of `Query/query` and stored
//! verbatim by the server for previous, saved and scheduled queries.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::meta::MetaParams;

fn stray_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" [\-.] ").expect("separator regex"))
}

/// Collapses the bare `" - "` and `" . "` tokens left behind when a term is
/// composed from an empty class or operator segment.
pub fn collapse_separators(text: &str) -> String {
    stray_separator().replace_all(text, " ").into_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    #[serde(default)]
    pub query_string: String,
    #[serde(default)]
    pub query_meta_params: MetaParams,
}

impl QueryPayload {
    pub fn new(query_string: impl Into<String>, query_meta_params: MetaParams) -> Self {
        Self {
            query_string: query_string.into(),
            query_meta_params,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn groupby(&self) -> Vec<String> {
        self.query_meta_params.groupby()
    }

    pub fn local_groupby(&self) -> Vec<String> {
        self.query_meta_params.local_groupby()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collapse_separators() {
        assert_eq!(collapse_separators(" +host=a - b"), " +host=a b");
        assert_eq!(collapse_separators("x . y"), "x y");
        assert_eq!(collapse_separators("a-b a.b"), "a-b a.b");
        assert_eq!(collapse_separators(" -program=sshd"), " -program=sshd");
    }

    #[test]
    fn test_json_field_names() {
        let mut metas = MetaParams::with_defaults();
        metas.set("archive", json!(1));
        let payload = QueryPayload::new("host=a", metas);
        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"query_string": "host=a", "query_meta_params": {"limit": 100, "archive": 1}})
        );
    }

    #[test]
    fn test_from_json_tolerates_missing_metas() {
        let payload = QueryPayload::from_json(r#"{"query_string":"sshd"}"#).unwrap();
        assert_eq!(payload.query_string, "sshd");
        assert!(payload.query_meta_params.is_empty());
    }
}
