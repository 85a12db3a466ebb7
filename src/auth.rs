use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::{
    error::ApiError,
    token::{TokenError, TokenState},
};

/// AuthUser
///
/// The resolved identity of an authenticated request. `require_auth` stores it in the
/// request extensions; protected handlers take it as an argument.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

/// Pulls the raw token out of an `Authorization: Bearer <token>` header.
///
/// The prefix match is exact and case-sensitive. A header without it is treated as a
/// malformed token, not as a missing one.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(ApiError::MissingToken)?;
    let value = value.to_str().map_err(|_| ApiError::InvalidToken)?;
    value.strip_prefix("Bearer ").ok_or(ApiError::InvalidToken)
}

/// require_auth
///
/// Interceptor in front of every protected route. Validates the bearer token and either
/// short-circuits with 401 or attaches `AuthUser` to the request and calls through.
/// The reason a token was rejected is logged, never returned.
pub async fn require_auth(
    State(tokens): State<TokenState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Ok(token) => token,
        Err(rejection) => return rejection.into_response(),
    };

    let claims = match tokens.validate(token) {
        Ok(claims) => claims,
        Err(e) => {
            match e {
                TokenError::Expired => tracing::debug!("rejected expired token"),
                _ => tracing::warn!(error = %e, "rejected bearer token"),
            }
            return ApiError::InvalidToken.into_response();
        }
    };

    request.extensions_mut().insert(AuthUser {
        id: claims.sub,
        email: claims.email,
    });
    next.run(request).await
}

/// AuthUser Extractor Implementation
///
/// Reads the identity `require_auth` attached. A protected handler mounted without the
/// interceptor gets a 401 instead of running unauthenticated.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(ApiError::MissingToken)
    }
}
