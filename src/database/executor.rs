use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::store::{RecordStore, StoreQuery};
use crate::filter::{params, CompiledPredicate, FilterError, OrderTerm, PageRequest};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage timed out after {0:?}")]
    StorageTimeout(Duration),
}

/// One page of records plus the information needed to fetch the next.
#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub items: Vec<Map<String, Value>>,
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
    /// Offset of the following page; `None` on the last page.
    pub next_offset: Option<u64>,
    /// Opaque token equivalent to `next_offset`.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_limit: u32,
    pub max_page_size: u32,
}

/// Runs compiled predicates against a [`RecordStore`] with bounded pages
/// and a per-call deadline.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn RecordStore>,
    limits: PageLimits,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn RecordStore>, limits: PageLimits, timeout: Duration) -> Self {
        Self { store, limits, timeout }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Clamps the requested limit to `[1, max_page_size]`.
    pub fn clamp_limit(&self, requested: Option<u32>) -> u32 {
        let max = self.limits.max_page_size.max(1);
        let limit = requested.unwrap_or(self.limits.default_limit).clamp(1, max);
        if let Some(requested) = requested {
            if requested != limit {
                tracing::warn!("Requested limit {} clamped to {}", requested, limit);
            }
        }
        limit
    }

    /// Explicit `offset` wins over `cursor`.
    fn resolve_offset(page: &PageRequest) -> Result<u64, FilterError> {
        match (page.offset, page.cursor.as_deref()) {
            (Some(offset), _) => Ok(offset),
            (None, Some(cursor)) => {
                let offset = cursor
                    .trim()
                    .parse()
                    .map_err(|_| FilterError::syntax("cursor", "malformed cursor"))?;
                params::bounded_offset("cursor", offset)
            }
            (None, None) => Ok(0),
        }
    }

    pub async fn execute(
        &self,
        predicate: &CompiledPredicate,
        page: PageRequest,
        order: &[OrderTerm],
    ) -> Result<ResultPage, QueryError> {
        let limit = self.clamp_limit(page.limit);
        let offset = Self::resolve_offset(&page)?;
        let order = predicate.order_columns(order)?;

        let query = StoreQuery {
            table: predicate.schema().table().to_string(),
            predicate: predicate.predicate().clone(),
            order,
            limit,
            offset,
        };

        let rows = match tokio::time::timeout(self.timeout, self.store.fetch(&query)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => return Err(QueryError::StorageUnavailable(err.to_string())),
            Err(_) => return Err(QueryError::StorageTimeout(self.timeout)),
        };

        let mut items = rows.rows;
        items.truncate(limit as usize);
        let end = offset.saturating_add(items.len() as u64);
        let next_offset = (!items.is_empty() && end < rows.total).then_some(end);

        tracing::debug!(
            "Fetched {} of {} {} (offset {}, limit {})",
            items.len(),
            rows.total,
            predicate.schema().resource(),
            offset,
            limit
        );

        Ok(ResultPage {
            items,
            total: rows.total,
            limit,
            offset,
            next_offset,
            next_cursor: next_offset.map(|n| n.to_string()),
        })
    }

    /// First record matching `predicate`, if any.
    pub async fn find_one(&self, predicate: &CompiledPredicate) -> Result<Option<Map<String, Value>>, QueryError> {
        let page = PageRequest {
            limit: Some(1),
            ..PageRequest::default()
        };
        let result = self.execute(predicate, page, &[]).await?;
        Ok(result.items.into_iter().next())
    }

    pub async fn ping(&self) -> Result<(), QueryError> {
        match tokio::time::timeout(self.timeout, self.store.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(QueryError::StorageUnavailable(err.to_string())),
            Err(_) => Err(QueryError::StorageTimeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::test_principal;
    use crate::database::memory::MemoryStore;
    use crate::filter::{compile, parse, FieldSchema, FieldSpec, FieldType, FilterLimits};
    use serde_json::json;

    fn schema() -> Arc<FieldSchema> {
        Arc::new(
            FieldSchema::new("rules", "firewall_rules")
                .field("priority", FieldSpec::new("priority", FieldType::Integer))
                .soft_delete("deleted_at"),
        )
    }

    fn store(count: i64) -> MemoryStore {
        let rows = (1..=count)
            .map(|id| json!({"id": id, "priority": id % 3, "deleted_at": null}))
            .collect();
        MemoryStore::new().with_table("firewall_rules", rows)
    }

    fn executor(store: MemoryStore, max_page_size: u32) -> QueryExecutor {
        QueryExecutor::new(
            Arc::new(store),
            PageLimits {
                default_limit: 20,
                max_page_size,
            },
            Duration::from_millis(500),
        )
    }

    fn everything() -> CompiledPredicate {
        let expr = parse(&[], &FilterLimits::default()).unwrap();
        compile(&expr, &schema(), &test_principal("alice", &["read:rules"])).unwrap()
    }

    fn ids(page: &ResultPage) -> Vec<i64> {
        page.items.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn oversized_limit_is_clamped() {
        let exec = executor(store(250), 100);
        let page = exec
            .execute(
                &everything(),
                PageRequest {
                    limit: Some(100_000),
                    ..Default::default()
                },
                &[],
            )
            .await
            .unwrap();

        assert_eq!(page.limit, 100);
        assert_eq!(page.items.len(), 100);
        assert_eq!(page.total, 250);
        assert_eq!(page.next_offset, Some(100));
    }

    #[tokio::test]
    async fn limit_floor_and_default() {
        let exec = executor(store(30), 100);
        assert_eq!(exec.clamp_limit(Some(0)), 1);
        assert_eq!(exec.clamp_limit(None), 20);

        let page = exec.execute(&everything(), PageRequest::default(), &[]).await.unwrap();
        assert_eq!(page.items.len(), 20);
    }

    #[tokio::test]
    async fn sequential_pages_cover_everything_once() {
        let exec = executor(store(23), 100);
        let order = [OrderTerm::desc("priority")];
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = exec
                .execute(
                    &everything(),
                    PageRequest {
                        limit: Some(5),
                        offset: None,
                        cursor: cursor.clone(),
                    },
                    &order,
                )
                .await
                .unwrap();
            seen.extend(ids(&page));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seen.len(), 23);
        assert_eq!(sorted, (1..=23).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unknown_order_field_and_bad_cursor() {
        let exec = executor(store(3), 100);
        let err = exec
            .execute(&everything(), PageRequest::default(), &[OrderTerm::asc("secret")])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Filter(FilterError::UnknownField(f)) if f == "secret"));

        let err = exec
            .execute(
                &everything(),
                PageRequest {
                    cursor: Some("abc".into()),
                    ..Default::default()
                },
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Filter(FilterError::Syntax { .. })));

        for cursor in ["18446744073709551615", "9223372036854775808"] {
            let err = exec
                .execute(
                    &everything(),
                    PageRequest {
                        cursor: Some(cursor.into()),
                        ..Default::default()
                    },
                    &[],
                )
                .await
                .unwrap_err();
            assert!(
                matches!(err, QueryError::Filter(FilterError::Syntax { ref param, .. }) if param == "cursor"),
                "cursor {cursor}"
            );
        }
    }

    #[tokio::test]
    async fn storage_failures_are_classified() {
        let offline = store(3);
        offline.set_offline(true);
        let err = executor(offline, 100)
            .execute(&everything(), PageRequest::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::StorageUnavailable(_)));

        let slow = store(3).with_latency(Duration::from_secs(5));
        let err = executor(slow, 100)
            .execute(&everything(), PageRequest::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::StorageTimeout(_)));
    }

    #[tokio::test]
    async fn find_one_by_id() {
        let exec = executor(store(5), 100);
        let found = exec.find_one(&everything().with_id("4").unwrap()).await.unwrap();
        assert_eq!(found.unwrap()["id"], json!(4));
        assert!(exec.find_one(&everything().with_id("99").unwrap()).await.unwrap().is_none());
    }
}
