//! Buyer identity.
//!
//! Sign-in lives with an external provider; this module only reads the
//! HS256 tokens it issues. The `Authorization: Bearer` header is the primary
//! source; the `auth_token` cookie is the secondary direct read.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::reconciliation::{IdentityProvider, UserId};

pub const AUTH_COOKIE: &str = "auth_token";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,              // Subject (user ID)
    pub email: Option<String>,    // User's email
    pub exp: i64,                 // Expiration time
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl From<AuthError> for crate::errors::ServiceError {
    fn from(err: AuthError) -> Self {
        crate::errors::ServiceError::Unauthorized(err.to_string())
    }
}

/// HS256 signing and verification keys.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(
        &self,
        user_id: &str,
        email: Option<String>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            email,
            exp: Utc::now().timestamp() + ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })
    }

    /// `None` for a missing or unusable token; a bad token means guest.
    pub fn user_from(&self, token: Option<&str>) -> Option<UserId> {
        let token = token?;
        match self.verify(token) {
            Ok(claims) => Some(claims.sub),
            Err(err) => {
                debug!(error = %err, "ignoring identity token");
                None
            }
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Identity carried by the request's bearer token.
pub fn request_identity(keys: Option<&TokenKeys>, headers: &HeaderMap) -> Option<UserId> {
    keys?.user_from(bearer_token(headers))
}

/// Secondary identity read from the auth cookie of the current request.
pub struct CookieIdentityProvider {
    keys: Option<TokenKeys>,
    token: Option<String>,
}

impl CookieIdentityProvider {
    pub fn from_headers(keys: Option<TokenKeys>, headers: &HeaderMap) -> Self {
        Self {
            keys,
            token: cookie_value(headers, AUTH_COOKIE).map(str::to_owned),
        }
    }
}

#[async_trait]
impl IdentityProvider for CookieIdentityProvider {
    async fn current_user_id(&self) -> Option<UserId> {
        self.keys.as_ref()?.user_from(self.token.as_deref())
    }
}
