//! Rendering of compiled predicates into parameterized Postgres SQL.
//!
//! Identifiers come from the startup schema and values are always bound as
//! `$n` parameters, never interpolated.

use super::compiler::{OrderColumn, Predicate};
use super::schema::TypedValue;

#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<TypedValue>,
}

/// Quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Alias of the resource row in every rendered statement.
const ROW_ALIAS: &str = "t";

fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quote_ident(column))
}

struct WhereBuilder {
    params: Vec<TypedValue>,
    subqueries: usize,
}

impl WhereBuilder {
    fn new() -> Self {
        Self {
            params: Vec::new(),
            subqueries: 0,
        }
    }

    fn param(&mut self, value: TypedValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn build(&mut self, predicate: &Predicate, alias: &str) -> String {
        match predicate {
            Predicate::True => "TRUE".to_string(),
            Predicate::Compare { column, op, value } => {
                format!("{} {} {}", qualified(alias, column), op.to_sql(), self.param(value.clone()))
            }
            Predicate::In { column, values } => {
                if values.is_empty() {
                    return "FALSE".to_string();
                }
                let params: Vec<String> = values.iter().map(|v| self.param(v.clone())).collect();
                format!("{} IN ({})", qualified(alias, column), params.join(", "))
            }
            Predicate::Contains { column, needle } => {
                format!(
                    "strpos({}, {}) > 0",
                    qualified(alias, column),
                    self.param(TypedValue::Text(needle.clone()))
                )
            }
            Predicate::IsNull { column, is_null } => {
                let test = if *is_null { "IS NULL" } else { "IS NOT NULL" };
                format!("{} {}", qualified(alias, column), test)
            }
            Predicate::Exists {
                table,
                column,
                references,
                predicate,
            } => {
                self.subqueries += 1;
                let inner = format!("r{}", self.subqueries);
                let body = self.build(predicate, &inner);
                format!(
                    "EXISTS (SELECT 1 FROM {} {} WHERE {} = {} AND ({}))",
                    quote_ident(table),
                    inner,
                    qualified(&inner, column),
                    qualified(alias, references),
                    body
                )
            }
            Predicate::And(children) => self.join(children, alias, " AND ", "TRUE"),
            Predicate::Or(children) => self.join(children, alias, " OR ", "FALSE"),
            Predicate::Not(inner) => format!("NOT ({})", self.build(inner, alias)),
        }
    }

    fn join(&mut self, children: &[Predicate], alias: &str, joiner: &str, empty: &str) -> String {
        if children.is_empty() {
            return empty.to_string();
        }
        let parts: Vec<String> = children
            .iter()
            .map(|c| format!("({})", self.build(c, alias)))
            .collect();
        parts.join(joiner)
    }
}

/// WHERE clause body and its parameters. Columns are qualified with the
/// resource alias `t`.
pub fn where_clause(predicate: &Predicate) -> SqlQuery {
    let mut builder = WhereBuilder::new();
    let sql = builder.build(predicate, ROW_ALIAS);
    SqlQuery {
        sql,
        params: builder.params,
    }
}

fn order_clause(order: &[OrderColumn]) -> String {
    if order.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = order
        .iter()
        .map(|o| format!("{} {}", qualified(ROW_ALIAS, &o.column), o.direction.to_sql()))
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

/// One page of rows, each rendered as a JSON object.
pub fn select_page(table: &str, predicate: &Predicate, order: &[OrderColumn], limit: u32, offset: u64) -> SqlQuery {
    let filter = where_clause(predicate);
    let sql = format!(
        "SELECT row_to_json({alias})::jsonb AS record FROM {} {alias} WHERE {}{} LIMIT {} OFFSET {}",
        quote_ident(table),
        filter.sql,
        order_clause(order),
        limit,
        offset,
        alias = ROW_ALIAS
    );
    SqlQuery {
        sql,
        params: filter.params,
    }
}

pub fn count(table: &str, predicate: &Predicate) -> SqlQuery {
    let filter = where_clause(predicate);
    SqlQuery {
        sql: format!(
            "SELECT COUNT(*) AS count FROM {} {} WHERE {}",
            quote_ident(table),
            ROW_ALIAS,
            filter.sql
        ),
        params: filter.params,
    }
}
