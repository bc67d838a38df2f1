use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use super::error::FilterError;
use super::types::FilterOp;

/// Declared type of a filterable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    /// RFC 3339 timestamp.
    Timestamp,
    Uuid,
    /// Text restricted to a fixed set of values.
    Choice(Vec<String>),
}

impl FieldType {
    fn default_operators(&self) -> &'static [FilterOp] {
        use FilterOp::*;
        match self {
            FieldType::Text => &[Eq, Ne, In, Contains],
            FieldType::Integer | FieldType::Float | FieldType::Timestamp => {
                &[Eq, Ne, Gt, Gte, Lt, Lte, In]
            }
            FieldType::Boolean => &[Eq, Ne],
            FieldType::Uuid | FieldType::Choice(_) => &[Eq, Ne, In],
        }
    }

    /// Coerces a raw query value into this type.
    pub fn coerce(&self, field: &str, raw: &str) -> Result<TypedValue, FilterError> {
        let mismatch = || FilterError::TypeMismatch {
            field: field.to_string(),
            expected: self.to_string(),
            value: raw.to_string(),
        };
        let value = match self {
            FieldType::Text => TypedValue::Text(raw.to_string()),
            FieldType::Integer => TypedValue::Integer(raw.trim().parse().map_err(|_| mismatch())?),
            FieldType::Float => {
                let f: f64 = raw.trim().parse().map_err(|_| mismatch())?;
                if !f.is_finite() {
                    return Err(mismatch());
                }
                TypedValue::Float(f)
            }
            FieldType::Boolean => TypedValue::Boolean(parse_bool(raw).ok_or_else(mismatch)?),
            FieldType::Timestamp => TypedValue::Timestamp(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|_| mismatch())?
                    .with_timezone(&Utc),
            ),
            FieldType::Uuid => TypedValue::Uuid(Uuid::parse_str(raw.trim()).map_err(|_| mismatch())?),
            FieldType::Choice(choices) => {
                if !choices.iter().any(|c| c == raw) {
                    return Err(mismatch());
                }
                TypedValue::Text(raw.to_string())
            }
        };
        Ok(value)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => f.write_str("text"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Float => f.write_str("number"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Timestamp => f.write_str("RFC 3339 timestamp"),
            FieldType::Uuid => f.write_str("UUID"),
            FieldType::Choice(choices) => write!(f, "one of [{}]", choices.join(", ")),
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// A filter value after coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

/// Child table holding a field, linked back to the resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Related {
    pub table: String,
    /// Column of `table` holding the resource id.
    pub foreign_key: String,
}

/// One exposed field: where it lives and how it may be filtered.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub column: String,
    pub ty: FieldType,
    operators: BTreeSet<FilterOp>,
    /// Field is invisible to principals without this scope.
    pub required_scope: Option<String>,
    /// Set when the column lives in a child table rather than the resource row.
    pub related: Option<Related>,
}

impl FieldSpec {
    pub fn new(column: impl Into<String>, ty: FieldType) -> Self {
        let operators = ty.default_operators().iter().copied().collect();
        Self {
            column: column.into(),
            ty,
            operators,
            required_scope: None,
            related: None,
        }
    }

    /// Moves the column into a child table with one or more rows per record.
    /// A condition on the field matches when any linked row satisfies it.
    pub fn through(mut self, table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.related = Some(Related {
            table: table.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }

    /// Replaces the default operator set. `contains` is dropped for non-text fields.
    pub fn operators(mut self, ops: &[FilterOp]) -> Self {
        let text = matches!(self.ty, FieldType::Text);
        self.operators = ops
            .iter()
            .copied()
            .filter(|op| text || *op != FilterOp::Contains)
            .collect();
        self
    }

    /// Column may be NULL; enables `isnull`.
    pub fn nullable(mut self) -> Self {
        self.operators.insert(FilterOp::IsNull);
        self
    }

    pub fn requires_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = Some(scope.into());
        self
    }

    pub fn allows(&self, op: FilterOp) -> bool {
        self.operators.contains(&op)
    }

    fn visible_to(&self, scopes: &BTreeSet<String>) -> bool {
        self.required_scope
            .as_ref()
            .map_or(true, |scope| scopes.contains(scope))
    }
}

/// Row-level restriction applied to every compiled predicate.
#[derive(Debug, Clone)]
pub struct OwnerPolicy {
    /// Column holding the owning subject id.
    pub column: String,
    /// Principals holding this scope see all rows.
    pub bypass_scope: String,
}

/// Parent record that must exist, and not be soft-deleted, for a row to be
/// visible. Chains up through the parent's own parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub table: String,
    pub id_column: String,
    /// Column of the child row holding the parent id.
    pub foreign_key: String,
    pub soft_delete_column: Option<String>,
    pub parent: Option<Box<ParentLink>>,
}

/// Per-resource allowlist of filterable/orderable fields.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    resource: String,
    table: String,
    id_column: String,
    soft_delete_column: Option<String>,
    owner: Option<OwnerPolicy>,
    parent: Option<ParentLink>,
    fields: BTreeMap<String, FieldSpec>,
}

impl FieldSchema {
    /// `id` is registered as an integer field mapped to the `id` column.
    pub fn new(resource: impl Into<String>, table: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), FieldSpec::new("id", FieldType::Integer));
        Self {
            resource: resource.into(),
            table: table.into(),
            id_column: "id".to_string(),
            soft_delete_column: None,
            owner: None,
            parent: None,
            fields,
        }
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Replaces the unique id field used for lookups and as the ordering tie-break.
    pub fn id_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.remove("id");
        self.id_column = spec.column.clone();
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn soft_delete(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    pub fn owned_by(mut self, column: impl Into<String>, bypass_scope: impl Into<String>) -> Self {
        self.owner = Some(OwnerPolicy {
            column: column.into(),
            bypass_scope: bypass_scope.into(),
        });
        self
    }

    /// Hides rows whose `foreign_key` parent in `parent` is missing or
    /// soft-deleted, including any ancestors `parent` itself is linked to.
    pub fn child_of(mut self, foreign_key: impl Into<String>, parent: &FieldSchema) -> Self {
        self.parent = Some(ParentLink {
            table: parent.table.clone(),
            id_column: parent.id_column.clone(),
            foreign_key: foreign_key.into(),
            soft_delete_column: parent.soft_delete_column.clone(),
            parent: parent.parent.clone().map(Box::new),
        });
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Public name of the id field.
    pub fn id_field_name(&self) -> &str {
        self.fields
            .iter()
            .find(|(_, spec)| spec.column == self.id_column)
            .map(|(name, _)| name.as_str())
            .unwrap_or("id")
    }

    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete_column.as_deref()
    }

    pub fn owner(&self) -> Option<&OwnerPolicy> {
        self.owner.as_ref()
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    /// Resolves a public field name for a principal holding `scopes`.
    /// Fields guarded by a scope the principal lacks are reported as unknown.
    pub fn lookup(&self, name: &str, scopes: &BTreeSet<String>) -> Result<&FieldSpec, FilterError> {
        self.fields
            .get(name)
            .filter(|spec| spec.visible_to(scopes))
            .ok_or_else(|| FilterError::UnknownField(name.to_string()))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
