//! # Query Draft
//!
//! One search in progress: structured terms, the free-text query bar, meta
//! parameters, the active boolean connective and the Start/End time range.
//! Every mutation either applies completely or leaves the draft untouched.

pub mod term;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::QueryError;
use crate::field::{split_fqdn, FieldCatalog, ANY_CLASS};
use crate::meta::{self, MetaParams};
use crate::payload::{collapse_separators, QueryPayload};

pub use term::{parse_term_expression, parse_timestamp, quote_value, TermExpression, TimeUnit};

/// Token prepended to each appended term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BooleanConnective {
    #[default]
    Or,
    And,
    Not,
}

impl BooleanConnective {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Or => "",
            Self::And => "+",
            Self::Not => "-",
        }
    }
}

impl std::str::FromStr for BooleanConnective {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OR" => Ok(Self::Or),
            "AND" => Ok(Self::And),
            "NOT" => Ok(Self::Not),
            _ => Err(QueryError::InvalidBoolean(s.to_string())),
        }
    }
}

/// The Start/End controls. Either bound may be empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Rebuilds the controls from `start`/`end` metas (unix seconds).
    pub fn from_metas(metas: &MetaParams) -> Self {
        let at = |secs: Option<i64>| secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0));
        Self {
            start: at(metas.start()),
            end: at(metas.end()),
        }
    }
}

/// A term as entered by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermInput {
    pub field: String,
    pub value: Option<String>,
    pub operator: Option<String>,
}

impl TermInput {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: Some(value.into()),
            operator: None,
        }
    }

    /// A whole `field<op>value` expression typed into one box.
    pub fn expr(text: impl Into<String>) -> Self {
        Self {
            field: text.into(),
            value: None,
            operator: None,
        }
    }

    pub fn with_operator(mut self, op: impl Into<String>) -> Self {
        self.operator = Some(op.into());
        self
    }
}

/// What a successful [`Query::add_term`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermOutcome {
    /// A term was recorded and `fragment` appended to the free text.
    Appended { field: String, fragment: String },
    /// A time pseudo-field moved the time range instead.
    TimeWindow(TimeRange),
}

/// The input control a term came from, flagged on validation failure.
pub trait TermSource {
    fn mark_invalid(&mut self);
    fn clear_invalid(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    terms: BTreeMap<String, String>,
    free_text: String,
    metas: MetaParams,
    connective: BooleanConnective,
    time_range: TimeRange,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            terms: BTreeMap::new(),
            free_text: String::new(),
            metas: MetaParams::with_defaults(),
            connective: BooleanConnective::Or,
            time_range: TimeRange::default(),
        }
    }

    pub fn terms(&self) -> &BTreeMap<String, String> {
        &self.terms
    }

    pub fn free_text(&self) -> &str {
        &self.free_text
    }

    pub fn metas(&self) -> &MetaParams {
        &self.metas
    }

    pub fn metas_mut(&mut self) -> &mut MetaParams {
        &mut self.metas
    }

    pub fn connective(&self) -> BooleanConnective {
        self.connective
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn set_time_range(&mut self, range: TimeRange) {
        self.time_range = range;
    }

    // =========================================================================
    // Terms
    // =========================================================================

    /// Validates and records one term.
    ///
    /// `timestamp`, `minute`, `hour` and `day` under the `any` (or no) class
    /// are shorthand for a time window starting at the value; they move the
    /// time range and mirror it into `start`/`end` without adding a term.
    pub fn add_term(
        &mut self,
        input: TermInput,
        catalog: &FieldCatalog,
    ) -> Result<TermOutcome, QueryError> {
        let (field, operator, value) = match input.value.filter(|v| !v.is_empty()) {
            Some(value) => (input.field, input.operator, value),
            None => {
                let parsed = parse_term_expression(&input.field)?;
                (parsed.field, Some(parsed.operator), parsed.value)
            }
        };
        let operator = operator
            .filter(|op| !op.is_empty())
            .unwrap_or_else(|| "=".to_string());
        if field.is_empty() {
            return Err(QueryError::MissingField);
        }

        let value = quote_value(&value);
        tracing::debug!(
            "adding to current query field: {}{}, val: {}",
            self.connective.prefix(),
            field,
            value
        );
        catalog.validate_term(&field, &value)?;

        let (class, name) = split_fqdn(&field);
        let classless = class.is_empty() || class == ANY_CLASS;

        if classless {
            if let Some(unit) = TimeUnit::from_field(name) {
                let start = parse_timestamp(&value)?;
                let end = start
                    .checked_add_signed(Duration::seconds(unit.seconds()))
                    .ok_or_else(|| QueryError::InvalidTime(value.clone()))?;
                let range = TimeRange::new(Some(start), Some(end));
                self.time_range = range;
                self.metas.set(meta::START, json!(start.timestamp()));
                self.metas.set(meta::END, json!(end.timestamp()));
                return Ok(TermOutcome::TimeWindow(range));
            }
        }

        let fragment = if classless {
            format!(" {}{}{}{}", self.connective.prefix(), name, operator, value)
        } else {
            format!(
                " {}{}.{}{}{}",
                self.connective.prefix(),
                class,
                name,
                operator,
                value
            )
        };
        self.terms.insert(field.clone(), value);
        self.free_text.push_str(&fragment);
        Ok(TermOutcome::Appended { field, fragment })
    }

    /// [`Self::add_term`], flagging `source` with the result.
    pub fn add_term_from(
        &mut self,
        input: TermInput,
        catalog: &FieldCatalog,
        source: &mut dyn TermSource,
    ) -> Result<TermOutcome, QueryError> {
        let result = self.add_term(input, catalog);
        match &result {
            Ok(_) => source.clear_invalid(),
            Err(_) => source.mark_invalid(),
        }
        result
    }

    pub fn del_term(&mut self, field: &str) {
        tracing::debug!("removing current query term: {}", field);
        self.terms.remove(field);
    }

    pub fn reset_terms(&mut self) {
        tracing::debug!("resetting terms");
        self.terms.clear();
        self.free_text.clear();
    }

    // =========================================================================
    // Metas
    // =========================================================================

    /// Meta values are not checked client side; the server validates them.
    pub fn add_meta(&mut self, key: impl Into<String>, value: Value) -> Result<(), QueryError> {
        let key = key.into();
        tracing::debug!("adding to current query meta: {}, val: {}", key, value);
        self.metas.set(key, value);
        Ok(())
    }

    pub fn del_meta(&mut self, key: &str) {
        tracing::debug!("removing current query meta: {}", key);
        self.metas.remove(key);
    }

    pub fn reset_metas(&mut self) {
        self.metas.clear();
    }

    /// Selects a post-processing connector, or clears it with `None`.
    pub fn set_connector(&mut self, connector: Option<(&str, Vec<String>)>) {
        match connector {
            Some((name, params)) => {
                self.metas.set(meta::CONNECTOR, json!(name));
                self.metas.set(meta::CONNECTOR_PARAMS, json!(params));
            }
            None => {
                self.metas.remove(meta::CONNECTOR);
                self.metas.remove(meta::CONNECTOR_PARAMS);
            }
        }
    }

    // =========================================================================
    // Connective and free text
    // =========================================================================

    pub fn set_boolean(&mut self, token: &str) -> Result<(), QueryError> {
        self.connective = token.parse()?;
        Ok(())
    }

    pub fn append_text(&mut self, text: &str) {
        self.free_text.push_str(text);
    }

    pub fn set_query_text(&mut self, text: impl Into<String>) {
        self.free_text = text.into();
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    pub fn serialize(&self) -> QueryPayload {
        QueryPayload::new(collapse_separators(&self.free_text), self.metas.clone())
    }

    /// Loads a previously serialized payload. Terms are not re-validated.
    pub fn deserialize(&mut self, payload: &QueryPayload) {
        self.free_text = payload.query_string.clone();
        self.metas = payload.query_meta_params.clone();
    }

    /// The payload to submit: the time range folded into `start`/`end`.
    pub fn prepare_submission(&self) -> Result<QueryPayload, QueryError> {
        let mut submitted = self.clone();
        match self.time_range.start {
            Some(start) => submitted.metas.set(meta::START, json!(start.timestamp())),
            None => {
                submitted.metas.remove(meta::START);
            }
        }
        match self.time_range.end {
            Some(end) => submitted.metas.set(meta::END, json!(end.timestamp())),
            None => {
                submitted.metas.remove(meta::END);
            }
        }
        if let (Some(start), Some(end)) = (submitted.metas.start(), submitted.metas.end()) {
            if start > end {
                return Err(QueryError::InvalidTimeRange);
            }
        }
        Ok(submitted.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDescriptor, FieldType, InputValidation};

    fn catalog() -> FieldCatalog {
        FieldCatalog::new(vec![
            FieldDescriptor::new("SNORT", "sig_priority", FieldType::Int),
            FieldDescriptor::new("SNORT", "srcip", FieldType::String)
                .with_validation(InputValidation::Ipv4),
            FieldDescriptor::new("", "host", FieldType::String),
            FieldDescriptor::new("WINDOWS", "eventid", FieldType::Int),
        ])
    }

    #[derive(Default)]
    struct Control {
        invalid: bool,
    }

    impl TermSource for Control {
        fn mark_invalid(&mut self) {
            self.invalid = true;
        }
        fn clear_invalid(&mut self) {
            self.invalid = false;
        }
    }

    #[test]
    fn test_new_query_defaults() {
        let q = Query::new();
        assert!(q.terms().is_empty());
        assert_eq!(q.free_text(), "");
        assert_eq!(q.metas().limit(), Some(100));
        assert_eq!(q.connective(), BooleanConnective::Or);
    }

    #[test]
    fn test_int_term_accepts_only_digits() {
        let c = catalog();
        for (value, ok) in [("3", true), ("42", true), ("x", false), ("3.5", false), ("1 2", false)] {
            let mut q = Query::new();
            let res = q.add_term(TermInput::new("SNORT.sig_priority", value), &c);
            assert_eq!(res.is_ok(), ok, "{value}");
            assert_eq!(q.terms().is_empty(), !ok);
        }
    }

    #[test]
    fn test_value_with_space_is_quoted() {
        let mut q = Query::new();
        q.add_term(TermInput::new("host", "a b"), &catalog()).unwrap();
        assert_eq!(q.free_text(), " host=\"a b\"");
        assert_eq!(q.terms().get("host").map(String::as_str), Some("\"a b\""));
    }

    #[test]
    fn test_classed_term_fragment() {
        let mut q = Query::new();
        let out = q
            .add_term(TermInput::new("SNORT.srcip", "10.0.0.1"), &catalog())
            .unwrap();
        assert_eq!(
            out,
            TermOutcome::Appended {
                field: "SNORT.srcip".into(),
                fragment: " SNORT.srcip=10.0.0.1".into()
            }
        );
    }

    #[test]
    fn test_expression_form_and_operator() {
        let mut q = Query::new();
        q.add_term(TermInput::expr("SNORT.sig_priority>2"), &catalog()).unwrap();
        q.add_term(TermInput::new("WINDOWS.eventid", "4624").with_operator(":"), &catalog())
            .unwrap();
        assert_eq!(q.free_text(), " SNORT.sig_priority>2 WINDOWS.eventid:4624");
    }

    #[test]
    fn test_boolean_prefix_applies_per_term() {
        let c = catalog();
        let mut q = Query::new();
        q.add_term(TermInput::new("host", "a"), &c).unwrap();
        q.set_boolean("and").unwrap();
        q.add_term(TermInput::new("host", "b"), &c).unwrap();
        q.add_term(TermInput::new("SNORT.sig_priority", "1"), &c).unwrap();
        assert_eq!(q.free_text(), " host=a +host=b +SNORT.sig_priority=1");
        assert_eq!(q.free_text().matches('+').count(), 2);

        q.set_boolean("NOT").unwrap();
        q.add_term(TermInput::new("host", "c"), &c).unwrap();
        assert!(q.free_text().ends_with(" -host=c"));
    }

    #[test]
    fn test_invalid_boolean_leaves_connective() {
        let mut q = Query::new();
        q.set_boolean("AND").unwrap();
        assert_eq!(q.set_boolean("XOR"), Err(QueryError::InvalidBoolean("XOR".into())));
        assert_eq!(q.connective(), BooleanConnective::And);
    }

    #[test]
    fn test_rejected_term_leaves_query_unmodified() {
        let c = catalog();
        let mut q = Query::new();
        q.add_term(TermInput::new("host", "a"), &c).unwrap();
        let before = q.clone();
        assert!(matches!(
            q.add_term(TermInput::new("SNORT.srcip", "nope"), &c),
            Err(QueryError::InvalidValue { .. })
        ));
        assert!(matches!(
            q.add_term(TermInput::new("unknown.field", "x"), &c),
            Err(QueryError::UnknownField(_))
        ));
        assert!(matches!(
            q.add_term(TermInput::expr("hostname"), &c),
            Err(QueryError::MalformedTerm(_))
        ));
        assert_eq!(q.add_term(TermInput::expr("=x"), &c), Err(QueryError::MissingField));
        assert_eq!(q, before);
    }

    #[test]
    fn test_source_control_flagging() {
        let c = catalog();
        let mut q = Query::new();
        let mut control = Control::default();
        assert!(q
            .add_term_from(TermInput::new("SNORT.sig_priority", "x"), &c, &mut control)
            .is_err());
        assert!(control.invalid);
        q.add_term_from(TermInput::new("SNORT.sig_priority", "7"), &c, &mut control)
            .unwrap();
        assert!(!control.invalid);
    }

    #[test]
    fn test_time_pseudo_field_sets_window() {
        let c = catalog();
        let mut q = Query::new();
        let out = q
            .add_term(TermInput::new("any.hour", "2023-11-14 22:00:00"), &c)
            .unwrap();
        let TermOutcome::TimeWindow(range) = out else {
            panic!("expected a time window");
        };
        let start = range.start.unwrap().timestamp();
        assert_eq!(range.end.unwrap().timestamp(), start + 3600);
        assert_eq!(q.metas().start(), Some(start));
        assert_eq!(q.metas().end(), Some(start + 3600));
        assert!(q.terms().is_empty());
        assert_eq!(q.free_text(), "");

        q.add_term(TermInput::new("minute", "1700000000"), &c).unwrap();
        assert_eq!(q.metas().end(), Some(1_700_000_060));
    }

    #[test]
    fn test_unparseable_time_is_rejected() {
        let mut q = Query::new();
        assert!(matches!(
            q.add_term(TermInput::new("day", "someday"), &catalog()),
            Err(QueryError::InvalidTime(_))
        ));
        assert!(q.time_range().is_empty());
    }

    #[test]
    fn test_time_window_past_max_date_is_rejected() {
        let mut q = Query::new();
        let last = DateTime::<Utc>::MAX_UTC.timestamp().to_string();
        assert!(matches!(
            q.add_term(TermInput::new("day", last.as_str()), &catalog()),
            Err(QueryError::InvalidTime(_))
        ));
        assert!(q.time_range().is_empty());
        assert!(!q.metas().contains(meta::START));
    }

    #[test]
    fn test_any_class_term_drops_prefix() {
        let mut q = Query::new();
        q.add_term(TermInput::new("any.program", "sshd"), &catalog()).unwrap();
        assert_eq!(q.free_text(), " program=sshd");
        assert!(q.terms().contains_key("any.program"));
    }

    #[test]
    fn test_del_term_is_unconditional() {
        let mut q = Query::new();
        q.add_term(TermInput::new("host", "a"), &catalog()).unwrap();
        q.del_term("host");
        q.del_term("host");
        assert!(q.terms().is_empty());
    }

    #[test]
    fn test_reset_terms_keeps_metas() {
        let mut q = Query::new();
        q.add_term(TermInput::new("host", "a"), &catalog()).unwrap();
        q.add_meta("archive", json!(1)).unwrap();
        let metas = q.metas().clone();
        q.reset_terms();
        let payload = q.serialize();
        assert!(q.terms().is_empty());
        assert_eq!(payload.query_string, "");
        assert_eq!(payload.query_meta_params, metas);
    }

    #[test]
    fn test_metas_are_permissive() {
        let mut q = Query::new();
        assert!(q.add_meta("limit", json!("not a number")).is_ok());
        assert!(q.add_meta("whatever", json!({"x": 1})).is_ok());
        q.del_meta("whatever");
        assert!(!q.metas().contains("whatever"));
        q.reset_metas();
        assert!(q.metas().is_empty());
    }

    #[test]
    fn test_serialize_round_trip() {
        let c = catalog();
        let mut q = Query::new();
        q.add_term(TermInput::new("host", "a b"), &c).unwrap();
        q.set_boolean("AND").unwrap();
        q.add_term(TermInput::new("SNORT.sig_priority", "2"), &c).unwrap();
        q.add_meta("groupby", json!(["srcip"])).unwrap();
        let first = q.serialize();

        let mut restored = Query::new();
        restored.deserialize(&first);
        assert_eq!(restored.serialize(), first);
    }

    #[test]
    fn test_collapse_applies_on_serialize_only() {
        let mut q = Query::new();
        q.set_query_text("sshd - failed");
        assert_eq!(q.serialize().query_string, "sshd failed");
        assert_eq!(q.free_text(), "sshd - failed");

        let mut restored = Query::new();
        restored.deserialize(&QueryPayload::new("sshd - failed", MetaParams::new()));
        assert_eq!(restored.free_text(), "sshd - failed");
    }

    #[test]
    fn test_prepare_submission_time_range() {
        let mut q = Query::new();
        q.add_meta("start", json!(5)).unwrap();
        let payload = q.prepare_submission().unwrap();
        assert!(!payload.query_meta_params.contains("start"));

        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0);
        let end = DateTime::<Utc>::from_timestamp(1_700_003_600, 0);
        q.set_time_range(TimeRange::new(start, end));
        let payload = q.prepare_submission().unwrap();
        assert_eq!(payload.query_meta_params.start(), Some(1_700_000_000));
        assert_eq!(payload.query_meta_params.end(), Some(1_700_003_600));
        // the draft itself is not touched
        assert_eq!(q.metas().start(), Some(5));

        q.set_time_range(TimeRange::new(end, start));
        assert_eq!(q.prepare_submission(), Err(QueryError::InvalidTimeRange));
    }

    #[test]
    fn test_connector_selection() {
        let mut q = Query::new();
        q.set_connector(Some(("Email", vec!["ops@example.com".into()])));
        assert_eq!(q.metas().connector(), Some("Email"));
        q.set_connector(None);
        assert!(!q.metas().contains("connector_params"));
    }
}
