//! Authentication and authorization utilities
//!
//! Provides:
//! - JWT token generation and validation
//! - Server-side token records (hashed) for revocation
//! - Password hashing
//! - The `AuthUser` extractor and the `Actor` identity passed to the workflow

mod password;

pub use password::{hash_password, verify_password};

use crate::db::models::{User, UserRole};
use crate::db::Repository;
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Authenticated identity performing a workflow operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: UserRole,
}

impl Actor {
    pub fn new(id: Uuid, role: UserRole) -> Self {
        Self { id, role }
    }

    pub fn is_student(&self) -> bool {
        self.role.is_student()
    }

    pub fn is_lecturer(&self) -> bool {
        self.role.is_lecturer()
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self::new(user.id, user.role)
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Role at issue time
    pub role: UserRole,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Token ID; keeps two tokens issued in the same second distinct
    pub jti: String,
}

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
}

/// JWT token manager
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Sign a new token for a user
    pub fn issue(&self, user_id: Uuid, role: UserRole) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            role,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            AppError::Internal {
                message: format!("Failed to generate token: {}", e),
            }
        })?;

        Ok(IssuedToken {
            token,
            expires_at,
            expires_in: self.expiration_secs,
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }
}

/// Hash a bearer token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the token from an Authorization header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// What the `AuthUser` extractor needs from application state
#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<JwtManager>,
    pub repo: Repository,
}

/// The authenticated user behind a request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,

    /// Hash of the presented token, used by logout
    pub token_hash: String,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::from(&self.user)
    }

    /// Require one of the given roles
    pub fn require_role(&self, roles: &[UserRole]) -> Result<()> {
        if roles.contains(&self.user.role) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "This action is not available to the {} role",
                self.user.role
            )))
        }
    }
}

/// Axum extractor for AuthUser
impl<S> FromRequestParts<S> for AuthUser
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let auth = AuthState::from_ref(state);

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or(AppError::InvalidToken)?;
        let claims = auth.jwt.validate_token(token)?;

        let token_hash = hash_token(token);
        let stored = auth
            .repo
            .find_active_token(&token_hash)
            .await?
            .ok_or(AppError::InvalidToken)?;

        if stored.user_id.to_string() != claims.sub {
            return Err(AppError::InvalidToken);
        }

        let user = auth
            .repo
            .find_user_by_id(stored.user_id)
            .await?
            .ok_or(AppError::InvalidToken)?;

        debug!(user_id = %user.id, role = %user.role, "Request authenticated");

        Ok(AuthUser { user, token_hash })
    }
}
