use super::principal::{Principal, PrincipalResolver};
use super::AuthError;

/// Outcome of checking one request's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(Principal),
    Rejected(AuthError),
}

impl Admission {
    pub fn into_result(self) -> Result<Principal, AuthError> {
        match self {
            Admission::Admitted(principal) => Ok(principal),
            Admission::Rejected(err) => Err(err),
        }
    }
}

#[derive(Clone)]
pub struct AuthGuard {
    resolver: PrincipalResolver,
}

impl AuthGuard {
    pub fn new(resolver: PrincipalResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PrincipalResolver {
        &self.resolver
    }

    /// Admits the request iff it carries a valid bearer token whose scopes
    /// cover every entry of `required`.
    pub fn admit(&self, header: Option<&str>, required: &[String]) -> Admission {
        let raw = match bearer_token(header) {
            Some(raw) => raw,
            None => return Admission::Rejected(AuthError::Unauthenticated),
        };

        let principal = match self.resolver.resolve(raw) {
            Ok(principal) => principal,
            Err(err) => return Admission::Rejected(err),
        };

        if !principal.has_all(required) {
            tracing::warn!(
                "Principal {} lacks required scopes {:?}",
                principal.subject(),
                required
            );
            return Admission::Rejected(AuthError::Forbidden);
        }

        Admission::Admitted(principal)
    }
}

/// Extracts the token from `Bearer <token>`. The scheme is case-insensitive.
fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenCodec;
    use chrono::Utc;
    use jsonwebtoken::Algorithm;
    use std::sync::Arc;
    use std::time::Duration;

    fn guard() -> AuthGuard {
        let codec = TokenCodec::new(b"guard-secret-guard-secret-guard!", Algorithm::HS256).unwrap();
        AuthGuard::new(PrincipalResolver::new(Arc::new(codec)))
    }

    fn header_for(guard: &AuthGuard, scopes: &[&str]) -> String {
        let token = guard
            .resolver()
            .codec()
            .issue("alice", scopes.iter().copied(), Duration::from_secs(300))
            .unwrap();
        format!("Bearer {}", token.raw)
    }

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("BEARER abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Bearer")), None);
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn missing_or_malformed_credentials() {
        let guard = guard();
        for header in [None, Some(""), Some("Basic dXNlcjpwYXNz"), Some("Bearer "), Some("Bearer junk")] {
            assert_eq!(
                guard.admit(header, &[]),
                Admission::Rejected(AuthError::Unauthenticated),
                "{header:?}"
            );
        }
    }

    #[test]
    fn admits_iff_required_is_subset_of_granted() {
        let guard = guard();
        let header = header_for(&guard, &["read:widgets", "read:firewalls"]);

        let cases: [(&[&str], bool); 5] = [
            (&[], true),
            (&["read:widgets"], true),
            (&["read:widgets", "read:firewalls"], true),
            (&["write:widgets"], false),
            (&["read:widgets", "write:widgets"], false),
        ];
        for (required, admitted) in cases {
            let outcome = guard.admit(Some(header.as_str()), &scopes(required));
            if admitted {
                assert!(matches!(outcome, Admission::Admitted(ref p) if p.subject() == "alice"));
            } else {
                assert_eq!(outcome, Admission::Rejected(AuthError::Forbidden));
            }
        }
    }

    #[test]
    fn expired_token_is_unauthenticated_not_forbidden() {
        let guard = guard();
        let token = guard
            .resolver()
            .codec()
            .issue_at("alice", ["read:widgets"], Duration::from_secs(3600), Utc::now().timestamp() - 7200)
            .unwrap();
        let header = format!("Bearer {}", token.raw);

        assert_eq!(
            guard.admit(Some(header.as_str()), &scopes(&["admin"])),
            Admission::Rejected(AuthError::Unauthenticated)
        );
    }
}
