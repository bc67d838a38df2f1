use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::token::{Claims, TokenCodec};
use super::AuthError;

/// Authenticated caller for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    subject: String,
    scopes: BTreeSet<String>,
}

impl Principal {
    pub(super) fn from_claims(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            scopes: claims.scopes,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// True when every required scope was granted.
    pub fn has_all(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// Lookup of revoked token ids.
pub trait RevocationCheck: Send + Sync {
    fn is_revoked(&self, jti: &Uuid) -> bool;
}

/// In-process revocation list.
#[derive(Debug, Default)]
pub struct DenyList {
    revoked: RwLock<HashSet<Uuid>>,
}

impl DenyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self, jti: Uuid) {
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.insert(jti);
        }
    }
}

impl RevocationCheck for DenyList {
    fn is_revoked(&self, jti: &Uuid) -> bool {
        // A poisoned lock fails closed.
        self.revoked.read().map_or(true, |revoked| revoked.contains(jti))
    }
}

/// Turns a raw bearer token into a [`Principal`].
#[derive(Clone)]
pub struct PrincipalResolver {
    codec: Arc<TokenCodec>,
    revocation: Option<Arc<dyn RevocationCheck>>,
}

impl PrincipalResolver {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec, revocation: None }
    }

    pub fn with_revocation(mut self, check: Arc<dyn RevocationCheck>) -> Self {
        self.revocation = Some(check);
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn resolve(&self, raw: &str) -> Result<Principal, AuthError> {
        let claims = self.codec.decode(raw).map_err(|err| {
            tracing::debug!("Token rejected: {}", err);
            AuthError::Unauthenticated
        })?;
        self.admit_claims(claims)
    }

    pub fn resolve_at(&self, raw: &str, now: i64) -> Result<Principal, AuthError> {
        let claims = self.codec.decode_at(raw, now).map_err(|err| {
            tracing::debug!("Token rejected: {}", err);
            AuthError::Unauthenticated
        })?;
        self.admit_claims(claims)
    }

    fn admit_claims(&self, claims: Claims) -> Result<Principal, AuthError> {
        if let Some(check) = &self.revocation {
            if check.is_revoked(&claims.jti) {
                tracing::debug!("Token {} has been revoked", claims.jti);
                return Err(AuthError::Unauthenticated);
            }
        }
        Ok(Principal::from_claims(claims))
    }
}

#[cfg(test)]
pub(crate) fn test_principal(subject: &str, scopes: &[&str]) -> Principal {
    Principal {
        subject: subject.to_string(),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
    }
}
