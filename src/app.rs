use axum::{
    extract::{Path, Query, State},
    http::Method,
    middleware::from_fn_with_state,
    routing::get,
    Extension, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{AuthGuard, Principal, PrincipalResolver, RevocationCheck, TokenCodec};
use crate::config::{AppConfig, ConfigError};
use crate::database::{PageLimits, QueryExecutor, RecordStore};
use crate::filter::FilterLimits;
use crate::handlers;
use crate::middleware::{require_auth, RouteTable};
use crate::resources::{read_scope, ResourceRegistry};

/// Immutable per-process state, cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub guard: AuthGuard,
    pub registry: Arc<ResourceRegistry>,
    pub executor: QueryExecutor,
    pub routes: Arc<RouteTable>,
    pub filter_limits: FilterLimits,
    pub enable_cors: bool,
}

impl AppState {
    pub fn new(
        guard: AuthGuard,
        registry: ResourceRegistry,
        executor: QueryExecutor,
        filter_limits: FilterLimits,
    ) -> Self {
        let routes = route_table(&registry);
        Self {
            guard,
            registry: Arc::new(registry),
            executor,
            routes: Arc::new(routes),
            filter_limits,
            enable_cors: false,
        }
    }

    /// Wires codec, executor and resources from validated configuration.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn RecordStore>,
        revocation: Option<Arc<dyn RevocationCheck>>,
    ) -> Result<Self, ConfigError> {
        let codec = TokenCodec::new(config.security.jwt_secret.as_bytes(), config.jwt_algorithm()?)
            .map_err(|err| ConfigError::InvalidValue {
                key: "SECURITY_JWT_SECRET",
                value: err.to_string(),
            })?
            .with_skew(Duration::from_secs(config.security.clock_skew_secs));
        let mut resolver = PrincipalResolver::new(Arc::new(codec));
        if let Some(check) = revocation {
            resolver = resolver.with_revocation(check);
        }

        let executor = QueryExecutor::new(
            store,
            PageLimits {
                default_limit: config.filter.default_limit,
                max_page_size: config.filter.max_page_size,
            },
            config.query_timeout(),
        );

        let mut state = Self::new(
            AuthGuard::new(resolver),
            ResourceRegistry::standard(),
            executor,
            config.filter_limits(),
        );
        state.enable_cors = config.security.enable_cors;
        Ok(state)
    }
}

/// Access rules for every route served by [`router`].
pub fn route_table(registry: &ResourceRegistry) -> RouteTable {
    let mut table = RouteTable::new()
        .protect(Method::GET, "/health", &[])
        .protect(Method::GET, "/api/auth/whoami", &[]);
    for (name, _) in registry.iter() {
        let scope = read_scope(name);
        table = table
            .protect(Method::GET, format!("/api/{}", name), &[scope.as_str()])
            .protect(Method::GET, format!("/api/{}/:id", name), &[scope.as_str()]);
    }
    table
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/auth/whoami", get(handlers::whoami::whoami));

    for (name, schema) in state.registry.iter() {
        let list_schema = Arc::clone(schema);
        let show_schema = Arc::clone(schema);
        router = router
            .route(
                &format!("/api/{}", name),
                get(
                    move |state: State<AppState>,
                          principal: Extension<Principal>,
                          query: Query<Vec<(String, String)>>| {
                        handlers::records::list(state, principal, query, Arc::clone(&list_schema))
                    },
                ),
            )
            .route(
                &format!("/api/{}/:id", name),
                get(
                    move |state: State<AppState>,
                          principal: Extension<Principal>,
                          id: Path<String>,
                          query: Query<Vec<(String, String)>>| {
                        handlers::records::show(state, principal, id, query, Arc::clone(&show_schema))
                    },
                ),
            );
    }

    let router = router
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .layer(TraceLayer::new_for_http());
    let router = if state.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(state)
}
