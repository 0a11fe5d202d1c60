//! HS256 bearer tokens carrying a [`User`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dphp_types::{Role, User};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Token lifetime.
pub const TOKEN_TTL_HOURS: i64 = 72;

/// How far in the past `iat` is set, to absorb clock skew.
pub const ISSUED_AT_SKEW_MINUTES: i64 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Claims {
    sub: String,
    roles: Vec<Role>,
    exp: i64,
    iat: i64,
}

/// Signs and verifies bearer tokens with the newest configured secret.
///
/// Secrets are base64 encoded; older ones stay configured during rotation
/// but only the last one is used.
#[derive(Clone)]
pub struct TokenIssuer {
    key: Vec<u8>,
}

impl TokenIssuer {
    pub fn new<S: AsRef<str>>(secrets: &[S]) -> AuthResult<Self> {
        let active = secrets
            .last()
            .ok_or_else(|| AuthError::Token("no secrets given in config".to_string()))?;
        let key = STANDARD
            .decode(active.as_ref().trim())
            .map_err(|e| AuthError::Token(format!("secret is not valid base64: {e}")))?;
        Ok(Self { key })
    }

    pub fn issue(&self, user: &User) -> AuthResult<String> {
        self.issue_at(user, Utc::now())
    }

    pub fn issue_at(&self, user: &User, now: DateTime<Utc>) -> AuthResult<String> {
        let claims = Claims {
            sub: user.user_id.to_string(),
            roles: user.roles.clone(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
            iat: (now - Duration::minutes(ISSUED_AT_SKEW_MINUTES)).timestamp(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.key),
        )?)
    }

    /// Decode an `Authorization` header value of the form `Bearer <token>`.
    pub fn verify(&self, authorization: &str) -> AuthResult<User> {
        let token = authorization
            .strip_prefix("Bearer ")
            .ok_or_else(|| AuthError::Token("expected a Bearer token".to_string()))?;

        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<Claims>(
            token.trim(),
            &DecodingKey::from_secret(&self.key),
            &validation,
        )?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::Token("token has no subject".to_string()));
        }
        Ok(User::new(data.claims.sub, data.claims.roles))
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}
