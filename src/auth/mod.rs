pub mod guard;
pub mod principal;
pub mod token;

use thiserror::Error;

pub use guard::{Admission, AuthGuard};
pub use principal::{DenyList, Principal, PrincipalResolver, RevocationCheck};
pub use token::{Claims, Token, TokenCodec, TokenError};

/// Client-facing authentication failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Insufficient scope")]
    Forbidden,
}
