use axum::Extension;

use crate::auth::Principal;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /api/auth/whoami - the authenticated principal
///
/// ```json
/// { "success": true, "data": { "subject": "alice", "scopes": ["read:firewalls"] } }
/// ```
pub async fn whoami(Extension(principal): Extension<Principal>) -> ApiResult<Principal> {
    Ok(ApiResponse::success(principal))
}
