//! # beacon-auth
//!
//! Handshake token verification. The transport handshake carries an opaque
//! bearer token; the broker verifies it (HS256) and extracts the
//! authenticated identity `{client_id, role}` before any event is
//! dispatched. Token issuance lives in the login service; the `mint` helper
//! here exists for operational tooling and tests.

#![deny(unsafe_code)]

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use beacon_core::ids::ClientId;
use beacon_core::protocol::Role;

/// Claims carried inside a broker token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Client identity (unique within the role).
    pub sub: String,
    /// Client role.
    pub role: Role,
    /// Expiry, epoch seconds.
    pub exp: i64,
}

/// Authenticated identity pinned to a connection for its whole lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub client_id: ClientId,
    pub role: Role,
}

/// Token verification failure. Collapsed to `AUTH_INVALID_TOKEN` on the wire;
/// the variant detail is for server logs only.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token rejected: {0}")]
    Verification(#[from] jsonwebtoken::errors::Error),
    #[error("token has an empty subject")]
    EmptySubject,
}

/// Verifies handshake tokens against a shared secret.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier from the shared HS256 secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token and extract the authenticated identity.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &self.validation)?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::EmptySubject);
        }
        Ok(Identity {
            client_id: ClientId::from_string(data.claims.sub),
            role: data.claims.role,
        })
    }
}

/// Mint a token for the given identity, valid for `ttl_secs`.
pub fn mint(
    secret: &str,
    client_id: &str,
    role: Role,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = TokenClaims {
        sub: client_id.to_owned(),
        role,
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
