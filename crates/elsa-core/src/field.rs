//! # Field Catalog
//!
//! The queryable fields announced by the server at load time
//! (`Query/get_form_params`). Read-only to the rest of the model: terms are
//! validated against it and the group-by policy asks it for field types.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Class prefix shared by all pseudo-fields.
pub const ANY_CLASS: &str = "any";

/// Fields every log carries regardless of class. Valid as terms with or
/// without the `any.` prefix.
pub const PSEUDO_FIELDS: [&str; 7] = [
    "class",
    "program",
    "timestamp",
    "minute",
    "hour",
    "day",
    "node",
];

/// Returns `true` for `class`, `any.class`, `program`, `any.program`, etc.
pub fn is_pseudo_field(fqdn: &str) -> bool {
    let bare = fqdn
        .strip_prefix(ANY_CLASS)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(fqdn);
    PSEUDO_FIELDS.contains(&bare)
}

/// Splits `class.name` into its parts. A bare name has an empty class.
pub fn split_fqdn(fqdn: &str) -> (&str, &str) {
    match fqdn.split_once('.') {
        Some((class, name)) if !name.is_empty() => (class, name),
        Some((class, _)) => ("", class),
        None => ("", fqdn),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    #[default]
    String,
}

impl FieldType {
    /// Anything the server does not call `int` is matched as free text.
    pub fn from_wire(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("int") {
            Self::Int
        } else {
            Self::String
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::String => write!(f, "string"),
        }
    }
}

/// Descriptor-specific value pattern (`input_validation` on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValidation {
    Ipv4,
    Other(String),
}

impl InputValidation {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => None,
            "IPv4" => Some(Self::Ipv4),
            other => Some(Self::Other(other.to_string())),
        }
    }
}

fn int_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").expect("static regex"))
}

fn string_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^.+$").expect("static regex"))
}

fn ipv4_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^['"]?\d+\.\d+\.\d+\.\d+['"]?$"#).expect("static regex"))
}

/// One queryable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Namespace; empty for unclassified fields.
    pub class: String,
    pub name: String,
    /// `class.name`, or the bare name when `class` is empty.
    pub fqdn: String,
    pub field_type: FieldType,
    pub validation: Option<InputValidation>,
}

impl FieldDescriptor {
    pub fn new(class: impl Into<String>, name: impl Into<String>, field_type: FieldType) -> Self {
        let class = class.into();
        let name = name.into();
        let fqdn = if class.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", class, name)
        };
        Self {
            class,
            name,
            fqdn,
            field_type,
            validation: None,
        }
    }

    pub fn with_validation(mut self, validation: InputValidation) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Tests `value` against this field's pattern. A validation pattern takes
    /// precedence over the type pattern.
    pub fn accepts(&self, value: &str) -> Result<bool, QueryError> {
        let pattern = match &self.validation {
            Some(InputValidation::Ipv4) => ipv4_pattern(),
            Some(InputValidation::Other(name)) => {
                return Err(QueryError::UnknownValidation(name.clone()))
            }
            None => match self.field_type {
                FieldType::Int => int_pattern(),
                FieldType::String => string_pattern(),
            },
        };
        Ok(pattern.is_match(value))
    }
}

/// A field record as sent in `form_params.fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    #[serde(default)]
    pub fqdn_field: Option<String>,
    /// Bare field name.
    pub value: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub input_validation: Option<String>,
}

impl From<&FieldRecord> for FieldDescriptor {
    fn from(record: &FieldRecord) -> Self {
        let field_type = record
            .field_type
            .as_deref()
            .map(FieldType::from_wire)
            .unwrap_or_default();
        let mut descriptor = FieldDescriptor::new(record.class.clone(), record.value.clone(), field_type);
        if let Some(fqdn) = record.fqdn_field.as_ref().filter(|f| !f.is_empty()) {
            descriptor.fqdn = fqdn.clone();
        }
        descriptor.validation = record
            .input_validation
            .as_deref()
            .and_then(InputValidation::from_wire);
        descriptor
    }
}

/// Scheduling action offered by the server (e.g. `Save`, `Email`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAction {
    pub action_id: serde_json::Value,
    pub action: String,
}

/// The `Query/get_form_params` document. Only the parts the client uses
/// are typed; everything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormParams {
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
    /// Class id to class name.
    #[serde(default)]
    pub classes: BTreeMap<String, String>,
    #[serde(default)]
    pub schedule_actions: Vec<ScheduleAction>,
}

impl FormParams {
    /// Id of the `Save` scheduling action, `0` when the server has none.
    pub fn save_action_id(&self) -> serde_json::Value {
        self.schedule_actions
            .iter()
            .find(|a| a.action == "Save")
            .map(|a| a.action_id.clone())
            .unwrap_or_else(|| serde_json::json!(0))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldCatalog {
    fields: Vec<FieldDescriptor>,
    classes: BTreeMap<String, String>,
}

impl FieldCatalog {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self {
            fields,
            classes: BTreeMap::new(),
        }
    }

    pub fn from_form_params(params: &FormParams) -> Self {
        Self {
            fields: params.fields.iter().map(FieldDescriptor::from).collect(),
            classes: params.classes.clone(),
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn classes(&self) -> &BTreeMap<String, String> {
        &self.classes
    }

    /// Finds a field by fully qualified name or by bare name, first match in
    /// catalog order.
    pub fn resolve(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.fqdn == name || f.name == name)
    }

    /// Exact fully qualified lookup.
    pub fn by_fqdn(&self, fqdn: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.fqdn == fqdn)
    }

    /// Type of `fqdn`; unknown fields count as strings.
    pub fn field_type(&self, fqdn: &str) -> FieldType {
        self.by_fqdn(fqdn)
            .map(|f| f.field_type)
            .unwrap_or_default()
    }

    /// Checks that `fqdn` names a known field or pseudo-field and that
    /// `value` matches its pattern.
    pub fn validate_term(&self, fqdn: &str, value: &str) -> Result<(), QueryError> {
        if is_pseudo_field(fqdn) {
            return Ok(());
        }
        let field = self
            .resolve(fqdn)
            .ok_or_else(|| QueryError::UnknownField(fqdn.to_string()))?;
        tracing::debug!("testing {} against {:?}", value, field.validation);
        if field.accepts(value)? {
            Ok(())
        } else {
            Err(QueryError::InvalidValue {
                field: fqdn.to_string(),
                value: value.to_string(),
            })
        }
    }
}
