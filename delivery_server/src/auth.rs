//! Access tokens.
//!
//! Every request to `/api` and every WebSocket connection carries an HS256 JWT whose claims name the caller:
//! * `sub` - the party id (customer, restaurant, courier or operator id)
//! * `role` - one of `customer`, `restaurant`, `courier` or `operator`
//! * `exp` - expiry, in seconds since the epoch
//!
//! Tokens are issued by the marketplace's identity service. [`TokenIssuer`] exists for operator tooling and tests.
use std::{
    future::{ready, Ready},
    time::Duration,
};

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use chrono::Utc;
use delivery_engine::db_types::{Actor, Role};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    config::AuthConfig,
    errors::{AuthError, ServerError},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
}

impl JwtClaims {
    pub fn new(role: Role, id: i64, lifetime: Duration) -> Self {
        let exp = Utc::now().timestamp() + lifetime.as_secs() as i64;
        Self { sub: id.to_string(), role, exp }
    }

    /// The caller, as the engine sees it. The `system` role is internal and never accepted from a token.
    pub fn actor(&self) -> Result<Actor, AuthError> {
        if self.role == Role::System {
            return Err(AuthError::InsufficientPermissions("The system role cannot be claimed".into()));
        }
        let id = self
            .sub
            .parse::<i64>()
            .map_err(|e| AuthError::PoorlyFormattedToken(format!("The subject claim is not a party id. {e}")))?;
        Ok(Actor::new(self.role, id))
    }
}

/// Claims are placed in the request extensions by the JWT middleware.
impl FromRequest for JwtClaims {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let claims = req.extensions().get::<JwtClaims>().cloned().ok_or(AuthError::MissingToken).map_err(Into::into);
        ready(claims)
    }
}

/// Extracts the token from an `Authorization: Bearer <jwt>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let key = DecodingKey::from_secret(config.jwt_secret.reveal().as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        Self { key, validation }
    }

    pub fn verify(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::ValidationError("The token has expired".into()),
            ErrorKind::InvalidSignature => AuthError::ValidationError("The token signature is invalid".into()),
            _ => AuthError::PoorlyFormattedToken(e.to_string()),
        })?;
        debug!("💻️ Access token validated for {}:{}", data.claims.role, data.claims.sub);
        Ok(data.claims)
    }
}

pub struct TokenIssuer {
    key: EncodingKey,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        let key = EncodingKey::from_secret(config.jwt_secret.reveal().as_bytes());
        Self { key, lifetime: config.token_lifetime }
    }

    /// Issue a new access token for the given party. The caller is responsible for having established who the party
    /// is.
    pub fn issue_token(&self, role: Role, id: i64, duration: Option<Duration>) -> Result<String, AuthError> {
        let claims = JwtClaims::new(role, id, duration.unwrap_or(self.lifetime));
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &JwtClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.key).map_err(|e| AuthError::ValidationError(e.to_string()))
    }
}
