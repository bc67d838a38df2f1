use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::{Query, QueryScalar};
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use tracing::info;

use super::store::{RecordStore, StoreError, StoreQuery, StoreRows};
use crate::config::DatabaseConfig;
use crate::filter::{sql, TypedValue};

/// Postgres-backed store. Every query is parameterized; see `filter::sql`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds a pool that connects on first use, so the server starts even
    /// while the database is down.
    pub fn connect_lazy(config: &DatabaseConfig, url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy(url)?;
        info!("Configured Postgres pool (max {} connections)", config.max_connections);
        Ok(Self::new(pool))
    }
}

fn bind<'q>(query: Query<'q, Postgres, PgArguments>, value: &TypedValue) -> Query<'q, Postgres, PgArguments> {
    match value {
        TypedValue::Text(v) => query.bind(v.clone()),
        TypedValue::Integer(v) => query.bind(*v),
        TypedValue::Float(v) => query.bind(*v),
        TypedValue::Boolean(v) => query.bind(*v),
        TypedValue::Timestamp(v) => query.bind(*v),
        TypedValue::Uuid(v) => query.bind(*v),
    }
}

fn bind_scalar<'q>(
    query: QueryScalar<'q, Postgres, i64, PgArguments>,
    value: &TypedValue,
) -> QueryScalar<'q, Postgres, i64, PgArguments> {
    match value {
        TypedValue::Text(v) => query.bind(v.clone()),
        TypedValue::Integer(v) => query.bind(*v),
        TypedValue::Float(v) => query.bind(*v),
        TypedValue::Boolean(v) => query.bind(*v),
        TypedValue::Timestamp(v) => query.bind(*v),
        TypedValue::Uuid(v) => query.bind(*v),
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn fetch(&self, query: &StoreQuery) -> Result<StoreRows, StoreError> {
        use sqlx::Row;

        let select = sql::select_page(&query.table, &query.predicate, &query.order, query.limit, query.offset);
        tracing::debug!("Executing: {}", select.sql);
        let mut rows_query = sqlx::query(&select.sql);
        for value in &select.params {
            rows_query = bind(rows_query, value);
        }
        let records = rows_query.fetch_all(&self.pool).await?;

        let rows = records
            .iter()
            .map(|row| match row.try_get::<Value, _>("record")? {
                Value::Object(map) => Ok(map),
                other => Err(StoreError::Decode(format!("expected object, got {}", other))),
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let count = sql::count(&query.table, &query.predicate);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count.sql);
        for value in &count.params {
            count_query = bind_scalar(count_query, value);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        Ok(StoreRows {
            rows,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
