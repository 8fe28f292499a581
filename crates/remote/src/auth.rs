use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

mod middleware;
pub(crate) use middleware::require_session;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token subject `{0}` is not a user id")]
    InvalidSubject(String),
    #[error("invalid expiration: {0}")]
    InvalidExpiry(i64),
}

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionClaims {
    sub: String,
    exp: i64,
}

fn claims_to_context(token: TokenData<SessionClaims>) -> Result<RequestContext, AuthError> {
    let SessionClaims { sub, exp } = token.claims;

    let user_id = Uuid::parse_str(&sub).map_err(|_| AuthError::InvalidSubject(sub))?;
    let expires_at = Utc
        .timestamp_opt(exp, 0)
        .single()
        .ok_or(AuthError::InvalidExpiry(exp))?;

    Ok(RequestContext {
        user_id,
        expires_at,
    })
}

/// Verifies HS256 session tokens issued by the identity provider.
pub struct JwtAuth {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // Identity provider tokens carry an audience we don't pin.
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<RequestContext, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let claims = decode::<SessionClaims>(token, &self.key, &self.validation)?;
        claims_to_context(claims)
    }
}
