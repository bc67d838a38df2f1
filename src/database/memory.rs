use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{RecordStore, StoreError, StoreQuery, StoreRows};
use crate::filter::{Comparison, OrderColumn, Predicate, SortDirection, TypedValue};

type Row = Map<String, Value>;
type Tables = HashMap<String, Vec<Row>>;

/// In-process store evaluating predicates with SQL semantics: comparisons
/// against NULL are unknown, and unknown rows are filtered out.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    offline: Arc<AtomicBool>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table at construction time. Non-object rows are skipped.
    pub fn with_table(self, table: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        if let Ok(mut tables) = self.tables.try_write() {
            tables.insert(table.into(), rows);
        }
        self
    }

    /// Delays every call, for exercising request timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn insert(&self, table: &str, row: Row) {
        self.tables.write().await.entry(table.to_string()).or_default().push(row);
    }

    /// While offline every call fails as if the database were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    async fn enter(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch(&self, query: &StoreQuery) -> Result<StoreRows, StoreError> {
        self.enter().await?;
        let tables = self.tables.read().await;
        let rows = tables
            .get(&query.table)
            .ok_or_else(|| StoreError::UnknownTable(query.table.clone()))?;

        let mut matched: Vec<&Row> = rows
            .iter()
            .filter(|row| eval(&query.predicate, row, &tables) == Some(true))
            .collect();
        matched.sort_by(|a, b| compare_rows(a, b, &query.order));

        let total = matched.len() as u64;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let rows = matched
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(StoreRows { rows, total })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await
    }
}

fn column<'r>(row: &'r Row, name: &str) -> Option<&'r Value> {
    row.get(name).filter(|v| !v.is_null())
}

/// Three-valued evaluation: `None` is SQL's UNKNOWN. `tables` resolves
/// `Exists` lookups; a table that was never added has no rows.
fn eval(predicate: &Predicate, row: &Row, tables: &Tables) -> Option<bool> {
    match predicate {
        Predicate::True => Some(true),
        Predicate::Compare { column: name, op, value } => {
            let ordering = compare_value(column(row, name)?, value)?;
            Some(match op {
                Comparison::Eq => ordering == Ordering::Equal,
                Comparison::Ne => ordering != Ordering::Equal,
                Comparison::Gt => ordering == Ordering::Greater,
                Comparison::Gte => ordering != Ordering::Less,
                Comparison::Lt => ordering == Ordering::Less,
                Comparison::Lte => ordering != Ordering::Greater,
            })
        }
        Predicate::In { column: name, values } => {
            let cell = column(row, name)?;
            let mut unknown = false;
            for value in values {
                match compare_value(cell, value) {
                    Some(Ordering::Equal) => return Some(true),
                    Some(_) => {}
                    None => unknown = true,
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        Predicate::Contains { column: name, needle } => match column(row, name)? {
            Value::String(s) => Some(s.contains(needle.as_str())),
            _ => None,
        },
        Predicate::IsNull { column: name, is_null } => Some(column(row, name).is_none() == *is_null),
        Predicate::Exists {
            table,
            column: key,
            references,
            predicate,
        } => {
            let Some(target) = column(row, references) else {
                return Some(false);
            };
            let linked = tables.get(table).map(Vec::as_slice).unwrap_or_default();
            Some(linked.iter().any(|other| {
                column(other, key) == Some(target) && eval(predicate, other, tables) == Some(true)
            }))
        }
        Predicate::And(children) => {
            let mut result = Some(true);
            for child in children {
                match eval(child, row, tables) {
                    Some(false) => return Some(false),
                    None => result = None,
                    Some(true) => {}
                }
            }
            result
        }
        Predicate::Or(children) => {
            let mut result = Some(false);
            for child in children {
                match eval(child, row, tables) {
                    Some(true) => return Some(true),
                    None => result = None,
                    Some(false) => {}
                }
            }
            result
        }
        Predicate::Not(inner) => eval(inner, row, tables).map(|b| !b),
    }
}

/// Orders a stored cell against a typed filter value; `None` when incomparable.
fn compare_value(cell: &Value, value: &TypedValue) -> Option<Ordering> {
    match (cell, value) {
        (Value::String(s), TypedValue::Text(t)) => Some(s.as_str().cmp(t.as_str())),
        (Value::Number(n), TypedValue::Integer(i)) => match n.as_i64() {
            Some(cell) => Some(cell.cmp(i)),
            None => n.as_f64()?.partial_cmp(&(*i as f64)),
        },
        (Value::Number(n), TypedValue::Float(f)) => n.as_f64()?.partial_cmp(f),
        (Value::Bool(b), TypedValue::Boolean(v)) => Some(b.cmp(v)),
        (Value::String(s), TypedValue::Timestamp(ts)) => {
            let cell: DateTime<Utc> = DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc);
            Some(cell.cmp(ts))
        }
        (Value::String(s), TypedValue::Uuid(id)) => Some(Uuid::parse_str(s).ok()?.cmp(id)),
        _ => None,
    }
}

/// Postgres default null placement: NULLs sort as the largest value.
fn compare_rows(a: &Row, b: &Row, order: &[OrderColumn]) -> Ordering {
    for term in order {
        let ordering = match (column(a, &term.column), column(b, &term.column)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => compare_cells(x, y),
        };
        let ordering = match term.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_cells(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
