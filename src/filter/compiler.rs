use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::error::FilterError;
use super::schema::{parse_bool, FieldSchema, FieldSpec, FieldType, ParentLink, TypedValue};
use super::types::{Combinator, Condition, FilterExpression, FilterNode, FilterOp, OrderTerm, RawValue, SortDirection};
use crate::auth::Principal;

/// Binary comparisons that render directly as SQL operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn to_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }

    fn from_op(op: FilterOp) -> Option<Self> {
        match op {
            FilterOp::Eq => Some(Comparison::Eq),
            FilterOp::Ne => Some(Comparison::Ne),
            FilterOp::Gt => Some(Comparison::Gt),
            FilterOp::Gte => Some(Comparison::Gte),
            FilterOp::Lt => Some(Comparison::Lt),
            FilterOp::Lte => Some(Comparison::Lte),
            FilterOp::In | FilterOp::Contains | FilterOp::IsNull => None,
        }
    }
}

/// Typed predicate over physical columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    True,
    Compare {
        column: String,
        op: Comparison,
        value: TypedValue,
    },
    In {
        column: String,
        values: Vec<TypedValue>,
    },
    Contains {
        column: String,
        needle: String,
    },
    IsNull {
        column: String,
        is_null: bool,
    },
    /// Some row of `table` whose `column` equals this row's `references`
    /// satisfies `predicate`.
    Exists {
        table: String,
        column: String,
        references: String,
        predicate: Box<Predicate>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Conjunction that drops `True` terms and flattens nested ANDs.
    pub fn all(terms: impl IntoIterator<Item = Predicate>) -> Predicate {
        let mut flat = Vec::new();
        for term in terms {
            match term {
                Predicate::True => {}
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Predicate::True,
            1 => flat.remove(0),
            _ => Predicate::And(flat),
        }
    }
}

/// A filter validated against a schema for one principal.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    predicate: Predicate,
    schema: Arc<FieldSchema>,
    scopes: BTreeSet<String>,
}

/// Physical ordering column after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderColumn {
    pub column: String,
    pub direction: SortDirection,
}

impl CompiledPredicate {
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn schema(&self) -> &Arc<FieldSchema> {
        &self.schema
    }

    /// Maps public order terms to columns under the same visibility rules as
    /// filters, then appends the id column ascending unless already ordered on.
    pub fn order_columns(&self, terms: &[OrderTerm]) -> Result<Vec<OrderColumn>, FilterError> {
        let mut columns: Vec<OrderColumn> = Vec::with_capacity(terms.len() + 1);
        for term in terms {
            let spec = self.schema.lookup(&term.field, &self.scopes)?;
            if spec.related.is_some() {
                return Err(FilterError::syntax(
                    "order",
                    format!("'{}' has several values per record and cannot be ordered by", term.field),
                ));
            }
            if columns.iter().any(|c| c.column == spec.column) {
                continue;
            }
            columns.push(OrderColumn {
                column: spec.column.clone(),
                direction: term.direction,
            });
        }

        let id_column = self.schema.id_column();
        if !columns.iter().any(|c| c.column == id_column) {
            columns.push(OrderColumn {
                column: id_column.to_string(),
                direction: SortDirection::Asc,
            });
        }
        Ok(columns)
    }

    /// Restricts this predicate to the record with the given public id.
    pub fn with_id(&self, raw_id: &str) -> Result<CompiledPredicate, FilterError> {
        let name = self.schema.id_field_name();
        let spec = self.schema.lookup(name, &self.scopes)?;
        let value = spec.ty.coerce(name, raw_id)?;
        let by_id = Predicate::Compare {
            column: spec.column.clone(),
            op: Comparison::Eq,
            value,
        };
        Ok(CompiledPredicate {
            predicate: Predicate::all([self.predicate.clone(), by_id]),
            schema: Arc::clone(&self.schema),
            scopes: self.scopes.clone(),
        })
    }
}

/// Validates `expr` against `schema` for `principal` and attaches the
/// schema's row-level restrictions.
pub fn compile(
    expr: &FilterExpression,
    schema: &Arc<FieldSchema>,
    principal: &Principal,
) -> Result<CompiledPredicate, FilterError> {
    let compiler = Compiler {
        schema: schema.as_ref(),
        scopes: principal.scopes(),
    };
    let filter = compiler.node(expr.root())?;

    let mut terms = vec![filter];
    if let Some(owner) = schema.owner() {
        if !principal.has_scope(&owner.bypass_scope) {
            terms.push(Predicate::Compare {
                column: owner.column.clone(),
                op: Comparison::Eq,
                value: TypedValue::Text(principal.subject().to_string()),
            });
        }
    }
    if let Some(column) = schema.soft_delete_column() {
        terms.push(Predicate::IsNull {
            column: column.to_string(),
            is_null: true,
        });
    }
    if let Some(parent) = schema.parent() {
        terms.push(parent_is_live(parent));
    }

    let predicate = Predicate::all(terms);
    tracing::debug!("Compiled filter for {}: {:?}", schema.resource(), predicate);

    Ok(CompiledPredicate {
        predicate,
        schema: Arc::clone(schema),
        scopes: principal.scopes().clone(),
    })
}

fn parent_is_live(link: &ParentLink) -> Predicate {
    let mut terms = Vec::new();
    if let Some(column) = &link.soft_delete_column {
        terms.push(Predicate::IsNull {
            column: column.clone(),
            is_null: true,
        });
    }
    if let Some(grandparent) = &link.parent {
        terms.push(parent_is_live(grandparent));
    }
    Predicate::Exists {
        table: link.table.clone(),
        column: link.id_column.clone(),
        references: link.foreign_key.clone(),
        predicate: Box::new(Predicate::all(terms)),
    }
}

struct Compiler<'a> {
    schema: &'a FieldSchema,
    scopes: &'a BTreeSet<String>,
}

impl Compiler<'_> {
    fn node(&self, node: &FilterNode) -> Result<Predicate, FilterError> {
        match node {
            FilterNode::Leaf(condition) => self.leaf(condition),
            FilterNode::Group { kind, children } => {
                let compiled = children
                    .iter()
                    .map(|child| self.node(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match kind {
                    Combinator::And => Predicate::all(compiled),
                    Combinator::Or => Predicate::Or(compiled),
                    Combinator::Not => Predicate::Not(Box::new(Predicate::all(compiled))),
                })
            }
        }
    }

    fn leaf(&self, condition: &Condition) -> Result<Predicate, FilterError> {
        let spec = self.schema.lookup(&condition.field, self.scopes)?;
        if !spec.allows(condition.op) {
            return Err(FilterError::OperatorNotAllowed {
                field: condition.field.clone(),
                op: condition.op,
            });
        }
        let predicate = Self::condition(spec, condition)?;
        Ok(match &spec.related {
            Some(related) => Predicate::Exists {
                table: related.table.clone(),
                column: related.foreign_key.clone(),
                references: self.schema.id_column().to_string(),
                predicate: Box::new(predicate),
            },
            None => predicate,
        })
    }

    fn condition(spec: &FieldSpec, condition: &Condition) -> Result<Predicate, FilterError> {
        let Condition { field, op, value } = condition;
        let column = spec.column.clone();

        match op {
            FilterOp::In => {
                let values = match value {
                    RawValue::List(items) => items
                        .iter()
                        .map(|item| spec.ty.coerce(field, item))
                        .collect::<Result<Vec<_>, _>>()?,
                    RawValue::Single(item) => vec![spec.ty.coerce(field, item)?],
                };
                Ok(Predicate::In { column, values })
            }
            FilterOp::IsNull => {
                let raw = single(field, spec, value)?;
                let is_null = parse_bool(raw).ok_or_else(|| FilterError::TypeMismatch {
                    field: field.clone(),
                    expected: FieldType::Boolean.to_string(),
                    value: raw.to_string(),
                })?;
                Ok(Predicate::IsNull { column, is_null })
            }
            FilterOp::Contains => {
                let needle = single(field, spec, value)?.to_string();
                Ok(Predicate::Contains { column, needle })
            }
            other => {
                let raw = single(field, spec, value)?;
                let op = Comparison::from_op(*other).ok_or_else(|| FilterError::OperatorNotAllowed {
                    field: field.clone(),
                    op: *other,
                })?;
                Ok(Predicate::Compare {
                    column,
                    op,
                    value: spec.ty.coerce(field, raw)?,
                })
            }
        }
    }
}

fn single<'v>(field: &str, spec: &FieldSpec, value: &'v RawValue) -> Result<&'v str, FilterError> {
    match value {
        RawValue::Single(raw) => Ok(raw),
        RawValue::List(items) => Err(FilterError::TypeMismatch {
            field: field.to_string(),
            expected: match &spec.ty {
                FieldType::Choice(_) => spec.ty.to_string(),
                other => format!("single {other}"),
            },
            value: items.join(","),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::test_principal;
    use crate::filter::parser::parse;
    use crate::filter::schema::FieldSpec;
    use crate::filter::types::FilterLimits;

    fn widgets() -> Arc<FieldSchema> {
        Arc::new(
            FieldSchema::new("widgets", "widgets")
                .field("name", FieldSpec::new("name", FieldType::Text))
                .field("price", FieldSpec::new("price_cents", FieldType::Integer))
                .field("active", FieldSpec::new("active", FieldType::Boolean))
                .field("notes", FieldSpec::new("notes", FieldType::Text).nullable())
                .field("secret", FieldSpec::new("secret", FieldType::Text).requires_scope("admin"))
                .field("tag", FieldSpec::new("label", FieldType::Text).through("widget_tags", "widget_id"))
                .soft_delete("deleted_at"),
        )
    }

    fn compile_query(query: &[(&str, &str)], scopes: &[&str]) -> Result<CompiledPredicate, FilterError> {
        let pairs: Vec<(String, String)> = query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let expr = parse(&pairs, &FilterLimits::default())?;
        compile(&expr, &widgets(), &test_principal("alice", scopes))
    }

    fn not_deleted() -> Predicate {
        Predicate::IsNull {
            column: "deleted_at".into(),
            is_null: true,
        }
    }

    #[test]
    fn empty_filter_keeps_soft_delete_guard() {
        let compiled = compile_query(&[], &[]).unwrap();
        assert_eq!(compiled.predicate(), &not_deleted());
    }

    #[test]
    fn contradictory_range_compiles() {
        let compiled = compile_query(&[("price__gt", "100"), ("price__lt", "50")], &[]).unwrap();
        assert_eq!(
            compiled.predicate(),
            &Predicate::And(vec![
                Predicate::Compare {
                    column: "price_cents".into(),
                    op: Comparison::Gt,
                    value: TypedValue::Integer(100),
                },
                Predicate::Compare {
                    column: "price_cents".into(),
                    op: Comparison::Lt,
                    value: TypedValue::Integer(50),
                },
                not_deleted(),
            ])
        );
    }

    #[test]
    fn absent_fields_are_unknown() {
        assert_eq!(
            compile_query(&[("missing__eq", "x")], &[]).unwrap_err(),
            FilterError::UnknownField("missing".into())
        );
        // Scoped field stays unknown without the scope.
        assert_eq!(
            compile_query(&[("secret__eq", "x")], &[]).unwrap_err(),
            FilterError::UnknownField("secret".into())
        );
        assert!(compile_query(&[("secret__eq", "x")], &["admin"]).is_ok());
    }

    #[test]
    fn operator_and_type_checks() {
        assert_eq!(
            compile_query(&[("active__gt", "true")], &[]).unwrap_err(),
            FilterError::OperatorNotAllowed {
                field: "active".into(),
                op: FilterOp::Gt,
            }
        );
        assert!(matches!(
            compile_query(&[("price", "cheap")], &[]).unwrap_err(),
            FilterError::TypeMismatch { field, .. } if field == "price"
        ));
        assert!(matches!(
            compile_query(&[("price__in", "1,two,3")], &[]).unwrap_err(),
            FilterError::TypeMismatch { value, .. } if value == "two"
        ));
        assert!(matches!(
            compile_query(&[("notes__isnull", "maybe")], &[]).unwrap_err(),
            FilterError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn groups_compile_structurally() {
        let compiled = compile_query(&[("or", "(name__contains=bolt,not(price__gte=10))")], &[]).unwrap();
        assert_eq!(
            compiled.predicate(),
            &Predicate::And(vec![
                Predicate::Or(vec![
                    Predicate::Contains {
                        column: "name".into(),
                        needle: "bolt".into(),
                    },
                    Predicate::Not(Box::new(Predicate::Compare {
                        column: "price_cents".into(),
                        op: Comparison::Gte,
                        value: TypedValue::Integer(10),
                    })),
                ]),
                not_deleted(),
            ])
        );
    }

    #[test]
    fn owner_policy_respects_bypass_scope() {
        let schema = Arc::new(
            FieldSchema::new("notes", "notes")
                .field("title", FieldSpec::new("title", FieldType::Text))
                .owned_by("owner_id", "admin"),
        );
        let expr = parse(&[], &FilterLimits::default()).unwrap();

        let owned = compile(&expr, &schema, &test_principal("alice", &[])).unwrap();
        assert_eq!(
            owned.predicate(),
            &Predicate::Compare {
                column: "owner_id".into(),
                op: Comparison::Eq,
                value: TypedValue::Text("alice".into()),
            }
        );

        let admin = compile(&expr, &schema, &test_principal("root", &["admin"])).unwrap();
        assert_eq!(admin.predicate(), &Predicate::True);
    }

    #[test]
    fn order_columns_use_visibility_and_tie_break() {
        let compiled = compile_query(&[], &[]).unwrap();
        let columns = compiled.order_columns(&[OrderTerm::desc("price")]).unwrap();
        assert_eq!(
            columns,
            vec![
                OrderColumn {
                    column: "price_cents".into(),
                    direction: SortDirection::Desc,
                },
                OrderColumn {
                    column: "id".into(),
                    direction: SortDirection::Asc,
                },
            ]
        );

        let by_id = compiled.order_columns(&[OrderTerm::desc("id")]).unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].direction, SortDirection::Desc);

        assert_eq!(
            compiled.order_columns(&[OrderTerm::asc("secret")]).unwrap_err(),
            FilterError::UnknownField("secret".into())
        );
    }

    #[test]
    fn with_id_adds_typed_lookup() {
        let compiled = compile_query(&[], &[]).unwrap();
        let one = compiled.with_id("7").unwrap();
        assert_eq!(
            one.predicate(),
            &Predicate::And(vec![
                not_deleted(),
                Predicate::Compare {
                    column: "id".into(),
                    op: Comparison::Eq,
                    value: TypedValue::Integer(7),
                },
            ])
        );
        assert!(matches!(compiled.with_id("seven"), Err(FilterError::TypeMismatch { .. })));
    }

    #[test]
    fn isnull_accepts_every_boolean_spelling() {
        for (raw, expected) in [("true", true), ("TRUE", true), ("1", true), ("False", false), ("0", false)] {
            let compiled = compile_query(&[("notes__isnull", raw)], &[]).unwrap();
            assert_eq!(
                compiled.predicate(),
                &Predicate::And(vec![
                    Predicate::IsNull {
                        column: "notes".into(),
                        is_null: expected,
                    },
                    not_deleted(),
                ]),
                "notes__isnull={raw}"
            );
        }
    }

    #[test]
    fn related_fields_match_any_linked_row() {
        let compiled = compile_query(&[("tag__in", "red,blue")], &[]).unwrap();
        assert_eq!(
            compiled.predicate(),
            &Predicate::And(vec![
                Predicate::Exists {
                    table: "widget_tags".into(),
                    column: "widget_id".into(),
                    references: "id".into(),
                    predicate: Box::new(Predicate::In {
                        column: "label".into(),
                        values: vec![TypedValue::Text("red".into()), TypedValue::Text("blue".into())],
                    }),
                },
                not_deleted(),
            ])
        );

        assert!(matches!(
            compiled.order_columns(&[OrderTerm::asc("tag")]).unwrap_err(),
            FilterError::Syntax { param, .. } if param == "order"
        ));
    }

    #[test]
    fn children_require_live_ancestors() {
        let sites = FieldSchema::new("sites", "sites").soft_delete("deleted_at");
        let racks = FieldSchema::new("racks", "racks").soft_delete("deleted_at").child_of("site_id", &sites);
        let hosts = Arc::new(FieldSchema::new("hosts", "hosts").child_of("rack_id", &racks));
        let expr = parse(&[], &FilterLimits::default()).unwrap();

        let compiled = compile(&expr, &hosts, &test_principal("alice", &[])).unwrap();
        assert_eq!(
            compiled.predicate(),
            &Predicate::Exists {
                table: "racks".into(),
                column: "id".into(),
                references: "rack_id".into(),
                predicate: Box::new(Predicate::And(vec![
                    not_deleted(),
                    Predicate::Exists {
                        table: "sites".into(),
                        column: "id".into(),
                        references: "site_id".into(),
                        predicate: Box::new(not_deleted()),
                    },
                ])),
            }
        );
    }
}
