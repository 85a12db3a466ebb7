use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Lifetime of every issued token.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// The only algorithm accepted on validation. A token declaring anything else is rejected.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims
///
/// Payload of an issued bearer token: who the caller is and until when the token holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (sub): the user's id.
    pub sub: Uuid,
    pub email: String,
    /// Issued At (iat), unix seconds.
    pub iat: i64,
    /// Expiration Time (exp), unix seconds. Absolute; never extended.
    pub exp: i64,
}

#[derive(Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    /// Not parseable as a token, or the signature does not verify.
    #[error("token is malformed or its signature does not verify")]
    Malformed,

    /// Parsed and signed correctly but structurally unacceptable (wrong algorithm, missing claims).
    #[error("token is invalid")]
    Invalid,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// TokenService
///
/// Issues and validates HS256 tokens with the process-wide signing secret.
/// Built once at startup from `AppConfig::jwt_secret` and shared read-only.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

pub type TokenState = Arc<TokenService>;

impl TokenService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = true;
        // Expiry is exact: one second past `exp` is already rejected.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::hours(TOKEN_TTL_HOURS),
        }
    }

    /// Issue a token for `user_id` that expires 24 hours from now.
    pub fn issue(&self, user_id: Uuid, email: &str) -> Result<String, TokenError> {
        self.issue_at(user_id, email, Utc::now())
    }

    /// Issue a token as if it had been created at `issued_at`.
    pub fn issue_at(
        &self,
        user_id: Uuid,
        email: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
        };
        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature, algorithm and expiry, and return the claims.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidToken
                | ErrorKind::InvalidSignature
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => TokenError::Malformed,
                _ => TokenError::Invalid,
            })
    }
}
