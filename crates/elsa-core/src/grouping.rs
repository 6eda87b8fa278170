//! # Group-By Selection
//!
//! Decides whether a "Report On" selection is aggregated by the server
//! (`groupby` + `groups_only`) or fetched raw and counted locally
//! (`local_groupby` with a raised `limit`).

use std::collections::BTreeMap;

use serde_json::json;

use crate::field::{split_fqdn, FieldCatalog, FieldType, ANY_CLASS};
use crate::meta::{self, MetaParams};
use crate::response::{GroupRow, GroupTable, LogRow};

/// Menu label of the "no grouping" entry.
pub const NO_GROUP_BY: &str = "None";
/// Button label when nothing is grouped.
pub const DEFAULT_GROUP_BY_LABEL: &str = "Report On";
/// Rows fetched for client-side aggregation.
pub const LOCAL_GROUP_BY_LIMIT: u64 = 1000;

/// Buckets every class shares. Always aggregated by the server.
pub const ANY_CLASS_GROUP_FIELDS: [&str; 8] = [
    "host",
    "class",
    "program",
    "day",
    "hour",
    "minute",
    "timestamp",
    "node",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBySelection {
    None,
    /// A bucket from [`ANY_CLASS_GROUP_FIELDS`] across all classes.
    AnyClass(String),
    /// A catalog field, by fully qualified name.
    Field(String),
}

impl GroupBySelection {
    /// Parses a menu value: `None`, `any.<bucket>`, or a field name.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == NO_GROUP_BY {
            return Self::None;
        }
        match split_fqdn(raw) {
            (ANY_CLASS, name) => Self::AnyClass(name.to_string()),
            _ => Self::Field(raw.to_string()),
        }
    }

    /// Every entry of the "Report On" menu for `catalog`.
    pub fn options(catalog: &FieldCatalog) -> Vec<Self> {
        let mut options = vec![Self::None];
        options.extend(
            ANY_CLASS_GROUP_FIELDS
                .iter()
                .map(|f| Self::AnyClass(f.to_string())),
        );
        options.extend(catalog.fields().iter().map(|f| Self::Field(f.fqdn.clone())));
        options
    }

    pub fn label(&self) -> String {
        match self {
            Self::None => NO_GROUP_BY.to_string(),
            Self::AnyClass(name) => format!("{}.{}", ANY_CLASS, name),
            Self::Field(fqdn) => fqdn.clone(),
        }
    }
}

/// Rewrites the grouping metas for `selection`. The limit goes back to
/// `default_limit` unless the selection groups locally.
pub fn apply_group_by(
    metas: &mut MetaParams,
    selection: &GroupBySelection,
    catalog: &FieldCatalog,
    default_limit: u64,
    local_limit: u64,
) {
    metas.remove(meta::GROUPBY);
    metas.remove(meta::GROUPS_ONLY);
    metas.remove(meta::LOCAL_GROUPBY);
    metas.remove(meta::CLASS);
    metas.set(meta::LIMIT, json!(default_limit));

    match selection {
        GroupBySelection::None => {}
        GroupBySelection::AnyClass(name) => {
            metas.set(meta::CLASS, json!(ANY_CLASS));
            metas.set_groupby(vec![name.clone()]);
            metas.set(meta::GROUPS_ONLY, json!(1));
        }
        GroupBySelection::Field(fqdn) => {
            let (class, name) = split_fqdn(fqdn);
            if !class.is_empty() {
                metas.set(meta::CLASS, json!(class));
            }
            match catalog.field_type(fqdn) {
                FieldType::Int => {
                    metas.set_groupby(vec![name.to_string()]);
                    metas.set(meta::GROUPS_ONLY, json!(1));
                }
                FieldType::String => {
                    metas.set(meta::LOCAL_GROUPBY, json!([name]));
                    metas.set(meta::LIMIT, json!(local_limit));
                }
            }
        }
    }
    tracing::debug!("group by set to {}", selection.label());
}

/// `field` qualified with the class in `metas`, or `any.` when none is set.
pub fn qualified_group_field(metas: &MetaParams, field: &str) -> String {
    let class = metas.class().filter(|c| !c.is_empty()).unwrap_or(ANY_CLASS);
    format!("{}.{}", class, field)
}

/// The "Report On" button label for `metas`.
pub fn group_by_label(metas: &MetaParams) -> String {
    metas
        .groupby()
        .into_iter()
        .next()
        .or_else(|| metas.local_groupby().into_iter().next())
        .map(|field| qualified_group_field(metas, &field))
        .unwrap_or_else(|| DEFAULT_GROUP_BY_LABEL.to_string())
}

/// Counts `rows` per distinct value of `field`. Rows without the field are
/// skipped; ties keep value order.
pub fn aggregate_local(rows: &[LogRow], field: &str) -> GroupTable {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for value in rows.iter().filter_map(|r| r.field_value(field)) {
        *counts.entry(value).or_default() += 1;
    }
    GroupTable::new(
        field,
        counts
            .into_iter()
            .map(|(value, count)| GroupRow { value, count })
            .collect(),
    )
}
