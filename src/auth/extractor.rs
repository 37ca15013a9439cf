//! Bearer token extraction.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};

use crate::auth::jwt::{Claims, TokenIssuer, TokenKind};
use crate::error::AppError;

/// The verified claims of the request's access token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    (scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty()).then(|| token.trim())
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<TokenIssuer>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Token not provided".to_string()))?;

        let issuer = Arc::<TokenIssuer>::from_ref(state);
        match issuer.verify(TokenKind::Access, token) {
            Ok(claims) => {
                tracing::debug!(user_id = %claims.sub, path = %parts.uri.path(), "Authenticated request");
                Ok(AuthUser(claims))
            }
            Err(err) => {
                tracing::warn!(path = %parts.uri.path(), code = err.code(), "Authentication failed");
                Err(err)
            }
        }
    }
}

/// Reject unless the user holds one of `allowed` roles.
pub fn require_role(user: &AuthUser, allowed: &[&str]) -> Result<(), AppError> {
    if allowed.contains(&user.0.role.as_str()) {
        return Ok(());
    }
    tracing::warn!(
        user_id = %user.0.sub,
        role = %user.0.role,
        required = ?allowed,
        "Access denied: insufficient role"
    );
    Err(AppError::Forbidden(
        "You do not have permission to access this resource".to_string(),
    ))
}
