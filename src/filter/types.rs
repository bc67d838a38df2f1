use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of comparison operators accepted in filter leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
    #[serde(rename = "isnull")]
    IsNull,
}

impl FilterOp {
    pub const ALL: [FilterOp; 9] = [
        FilterOp::Eq,
        FilterOp::Ne,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
        FilterOp::In,
        FilterOp::Contains,
        FilterOp::IsNull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Contains => "contains",
            FilterOp::IsNull => "isnull",
        }
    }
}

impl FromStr for FilterOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOp::ALL.into_iter().find(|op| op.as_str() == s).ok_or(())
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean combinator kinds for explicit groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    And,
    Or,
    Not,
}

impl Combinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Combinator::And => "and",
            Combinator::Or => "or",
            Combinator::Not => "not",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "and" => Some(Combinator::And),
            "or" => Some(Combinator::Or),
            "not" => Some(Combinator::Not),
            _ => None,
        }
    }
}

/// Untyped leaf value. Coercion happens in the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Single(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
    pub value: RawValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterNode {
    Leaf(Condition),
    Group {
        kind: Combinator,
        children: Vec<FilterNode>,
    },
}

/// Parsed filter tree. The root is always an AND group of the top-level terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterExpression {
    pub(crate) root: FilterNode,
}

impl FilterExpression {
    pub fn root(&self) -> &FilterNode {
        &self.root
    }

    /// Top-level terms combined under the implicit AND.
    pub fn terms(&self) -> &[FilterNode] {
        match &self.root {
            FilterNode::Group { children, .. } => children,
            FilterNode::Leaf(_) => std::slice::from_ref(&self.root),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms().is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        fn count(node: &FilterNode) -> usize {
            match node {
                FilterNode::Leaf(_) => 1,
                FilterNode::Group { children, .. } => children.iter().map(count).sum(),
            }
        }
        count(&self.root)
    }
}

/// Complexity bounds enforced while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLimits {
    pub max_leaves: usize,
    /// The implicit top-level AND counts as depth 1.
    pub max_depth: usize,
    pub max_list_values: usize,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            max_leaves: 32,
            max_depth: 4,
            max_list_values: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A requested ordering term, still referring to a public field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderTerm {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Desc }
    }
}

/// Largest row offset the store accepts (Postgres `OFFSET` is a BIGINT).
pub const MAX_OFFSET: u64 = i64::MAX as u64;

/// Client paging request before clamping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub offset: Option<u64>,
    pub cursor: Option<String>,
}

/// Field names follow `[A-Za-z_][A-Za-z0-9_]*` and never contain `__`.
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !name.contains("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_round_trip_through_names() {
        for op in FilterOp::ALL {
            assert_eq!(op.as_str().parse::<FilterOp>(), Ok(op));
        }
        assert!("like".parse::<FilterOp>().is_err());
        assert!("EQ".parse::<FilterOp>().is_err());
    }

    #[test]
    fn field_names() {
        assert!(is_valid_field_name("name"));
        assert!(is_valid_field_name("_private"));
        assert!(is_valid_field_name("firewall_id"));
        assert!(!is_valid_field_name("a__b"));
        assert!(!is_valid_field_name("1abc"));
        assert!(!is_valid_field_name("na-me"));
        assert!(!is_valid_field_name("\"x\""));
        assert!(!is_valid_field_name(""));
    }
}
