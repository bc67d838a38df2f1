pub mod auth;
pub mod response;

pub use auth::{require_auth, RouteRule, RouteTable};
pub use response::{ApiResponse, ApiResult};
