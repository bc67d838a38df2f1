use chrono::Utc;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// A signed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct Token {
    pub raw: String,
    pub claims: Claims,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Malformed, badly signed, missing claims, or signed with another algorithm.
    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token expired")]
    Expired,
}

impl TokenError {
    fn invalid(err: impl fmt::Display) -> Self {
        TokenError::Invalid(err.to_string())
    }
}

/// Signs and verifies HMAC JWTs with one process-wide key.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    skew_secs: i64,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("skew_secs", &self.skew_secs)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], algorithm: Algorithm) -> Result<Self, TokenError> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(TokenError::Invalid(format!("{algorithm:?} is not an HMAC algorithm")));
        }
        if secret.is_empty() {
            return Err(TokenError::Invalid("empty signing secret".into()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            algorithm,
            skew_secs: 0,
        })
    }

    /// Tolerance, in seconds, added to `exp` before a token counts as expired.
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew_secs = i64::try_from(skew.as_secs()).unwrap_or(i64::MAX);
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn issue<I, S>(&self, subject: &str, scopes: I, ttl: Duration) -> Result<Token, TokenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue_at(subject, scopes, ttl, Utc::now().timestamp())
    }

    pub fn issue_at<I, S>(&self, subject: &str, scopes: I, ttl: Duration, now: i64) -> Result<Token, TokenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if subject.is_empty() {
            return Err(TokenError::Invalid("subject must not be empty".into()));
        }
        let ttl = i64::try_from(ttl.as_secs()).map_err(TokenError::invalid)?;
        let claims = Claims {
            sub: subject.to_string(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            iat: now,
            exp: now.saturating_add(ttl),
            jti: Uuid::new_v4(),
        };
        let raw = encode(&Header::new(self.algorithm), &claims, &self.encoding).map_err(TokenError::invalid)?;
        Ok(Token { raw, claims })
    }

    pub fn decode(&self, raw: &str) -> Result<Claims, TokenError> {
        self.decode_at(raw, Utc::now().timestamp())
    }

    /// Expiry is judged on the unverified claims first, so an expired token
    /// reports `Expired` whatever the state of its signature.
    pub fn decode_at(&self, raw: &str, now: i64) -> Result<Claims, TokenError> {
        let header = decode_header(raw).map_err(TokenError::invalid)?;
        if header.alg != self.algorithm {
            return Err(TokenError::Invalid(format!("unexpected algorithm {:?}", header.alg)));
        }

        let mut peek = self.validation();
        peek.insecure_disable_signature_validation();
        let unverified = decode::<Claims>(raw, &self.decoding, &peek).map_err(TokenError::invalid)?;
        if now >= unverified.claims.exp.saturating_add(self.skew_secs) {
            return Err(TokenError::Expired);
        }

        let verified = decode::<Claims>(raw, &self.decoding, &self.validation()).map_err(TokenError::invalid)?;
        Ok(verified.claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub", "jti"]);
        validation
    }
}
