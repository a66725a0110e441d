//! Handshake token verification for the connection gateway.
//!
//! Tokens are HS256 JWTs minted by the auth service. Verification happens
//! once per connection, before any room or presence state is touched.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

/// Identity derived from a verified token; immutable for the connection's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

/// Reasons a handshake is rejected. The client must reconnect with a fresh
/// token; there are no retries at this layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token")]
    NoToken,
    #[error("invalid structure")]
    InvalidStructure,
    #[error("expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Verify the handshake token and derive the connection's identity.
///
/// `userId` is the only mandatory claim; `email` and `name` fall back to
/// placeholder values when absent.
pub fn verify_token(secret: &str, token: Option<&str>) -> Result<Identity, AuthError> {
    let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::NoToken)?;

    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    let data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        _ => AuthError::InvalidStructure,
    })?;

    let claims = data.claims;
    Ok(Identity {
        user_id: claims.user_id,
        email: claims.email.unwrap_or_else(|| "Unknown".to_string()),
        name: claims.name.unwrap_or_else(|| "Unknown User".to_string()),
    })
}
