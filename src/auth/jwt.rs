//! Access and refresh tokens (HS256).

use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::users::User;
use crate::config::{AuthConfig, SecretsConfig};
use crate::error::AppError;

/// Token purpose, carried in the `typ` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub typ: TokenKind,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues and verifies both token kinds.
pub struct TokenIssuer {
    access: KeyPair,
    refresh: KeyPair,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    validation: Validation,
}

impl TokenIssuer {
    pub fn new(secrets: &SecretsConfig, auth: &AuthConfig) -> Self {
        let mut validation = Validation::default();
        validation.set_issuer(&[auth.issuer.as_str()]);
        validation.set_audience(&[auth.issuer.as_str()]);
        validation.leeway = 0;

        Self {
            access: KeyPair::from_secret(&secrets.jwt_secret),
            refresh: KeyPair::from_secret(secrets.refresh_secret()),
            issuer: auth.issuer.clone(),
            access_ttl_secs: auth.access_ttl_secs as i64,
            refresh_ttl_secs: auth.refresh_ttl_secs as i64,
            validation,
        }
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl_secs
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Claims for `user` issued at `now`.
    pub fn claims_for(&self, kind: TokenKind, user: &User, now: i64) -> Claims {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };
        Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role.clone(),
            iat: now,
            exp: now + ttl,
            iss: self.issuer.clone(),
            aud: self.issuer.clone(),
            typ: kind,
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::default(), claims, &self.keys(claims.typ).encoding)
            .map_err(|e| AppError::Internal(format!("token signing: {}", e)))
    }

    pub fn issue(&self, kind: TokenKind, user: &User) -> Result<String, AppError> {
        self.sign(&self.claims_for(kind, user, Utc::now().timestamp()))
    }

    /// Verify signature, expiry, issuer, audience and purpose.
    pub fn verify(&self, kind: TokenKind, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.keys(kind).decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::InvalidToken,
            })?;

        if data.claims.typ != kind {
            return Err(AppError::InvalidToken);
        }
        Ok(data.claims)
    }
}
