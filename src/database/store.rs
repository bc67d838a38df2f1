use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::filter::{OrderColumn, Predicate};

/// A single read-only query against one table.
#[derive(Debug, Clone)]
pub struct StoreQuery {
    pub table: String,
    pub predicate: Predicate,
    pub order: Vec<OrderColumn>,
    pub limit: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StoreRows {
    pub rows: Vec<Map<String, Value>>,
    /// Matching rows ignoring limit and offset.
    pub total: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected row shape: {0}")]
    Decode(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Persistence seam for record reads.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, query: &StoreQuery) -> Result<StoreRows, StoreError>;

    /// Cheap connectivity check used by `/health`.
    async fn ping(&self) -> Result<(), StoreError>;
}
