use axum::{
    extract::{MatchedPath, Request, State},
    http::{header::AUTHORIZATION, Method},
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::auth::Admission;
use crate::error::ApiError;

/// One protected route and the scopes it requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub method: Method,
    pub path: String,
    pub scopes: Vec<String>,
}

/// Explicit table of protected routes. Routes absent from the table are
/// rejected by [`require_auth`].
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protect(mut self, method: Method, path: impl Into<String>, scopes: &[&str]) -> Self {
        self.rules.push(RouteRule {
            method,
            path: path.into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Scopes required for `method path`, matched on the route template.
    pub fn required(&self, method: &Method, path: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|rule| rule.method == *method && rule.path == path)
            .map(|rule| rule.scopes.as_slice())
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

/// Authenticates and authorizes every request to a protected route before
/// its handler runs. On admission the [`Principal`](crate::auth::Principal)
/// is placed in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    matched: Option<MatchedPath>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let method = request.method().clone();
    let path = matched.as_ref().map(MatchedPath::as_str).unwrap_or_default();

    let required = match state.routes.required(&method, path) {
        Some(required) => required,
        None => {
            tracing::warn!("No access rule for {} {}, rejecting", method, path);
            return Err(ApiError::forbidden("Insufficient permissions"));
        }
    };

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match state.guard.admit(header, required) {
        Admission::Admitted(principal) => {
            tracing::debug!("Admitted {} for {} {}", principal.subject(), method, path);
            request.extensions_mut().insert(principal);
            Ok(next.run(request).await)
        }
        Admission::Rejected(err) => {
            tracing::warn!("Rejected {} {}: {}", method, path, err);
            Err(err.into())
        }
    }
}
