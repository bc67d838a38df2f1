use axum::{
    extract::{Path, Query, State},
    Extension,
};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::Principal;
use crate::database::ResultPage;
use crate::error::ApiError;
use crate::filter::{compile, params, parse, CompiledPredicate, FieldSchema, ListParams};
use crate::middleware::{ApiResponse, ApiResult};

type QueryPairs = Query<Vec<(String, String)>>;

fn compile_filter(
    state: &AppState,
    schema: &Arc<FieldSchema>,
    principal: &Principal,
    params: &ListParams,
) -> Result<CompiledPredicate, ApiError> {
    let expr = parse(&params.filter, &state.filter_limits)?;
    Ok(compile(&expr, schema, principal)?)
}

/// GET /api/{resource} - filtered, ordered, paged list
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(pairs): QueryPairs,
    schema: Arc<FieldSchema>,
) -> ApiResult<ResultPage> {
    let params = params::split(pairs)?;
    let predicate = compile_filter(&state, &schema, &principal, &params)?;
    let page = state.executor.execute(&predicate, params.page, &params.order).await?;
    Ok(ApiResponse::success(page))
}

/// GET /api/{resource}/:id - one record through the same predicate pipeline
pub async fn show(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Query(pairs): QueryPairs,
    schema: Arc<FieldSchema>,
) -> ApiResult<Map<String, Value>> {
    let params = params::split(pairs)?;
    let predicate = compile_filter(&state, &schema, &principal, &params)?.with_id(&id)?;

    match state.executor.find_one(&predicate).await? {
        Some(record) => Ok(ApiResponse::success(record)),
        None => Err(ApiError::not_found(format!("{} {} not found", schema.resource(), id))),
    }
}
