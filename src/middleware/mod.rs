//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs signed with the shared `JWT_SECRET`. The payload
//! carries `userId` and `isAdmin`; handlers receive them through the
//! [`AuthUser`] and [`AdminUser`] extractors.
//!
//! Deactivating or demoting an account writes a revocation marker to Redis;
//! tokens issued up to that second are refused until they would have
//! expired anyway.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::warn;

use crate::{error::AppError, redis_client::RedisClient};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: i64,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

fn revocation_key(user_id: i64) -> String {
    format!("auth:revoked:{}", user_id)
}

/// A token is dead if it was issued no later than the account's last
/// revocation.
pub fn is_revoked(issued_at: i64, revoked_at: Option<i64>) -> bool {
    revoked_at.is_some_and(|at| issued_at <= at)
}

/// Signing and verification keys derived from the shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_hours: i64,
    revocations: Option<RedisClient>,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_hours,
            revocations: None,
        }
    }

    /// Keeps revocation markers in Redis.
    pub fn with_revocations(mut self, redis: RedisClient) -> Self {
        self.revocations = Some(redis);
        self
    }

    /// Refuses every token issued to `user_id` so far.
    pub async fn revoke_user(&self, user_id: i64) -> Result<(), AppError> {
        let Some(redis) = &self.revocations else {
            return Ok(());
        };
        let ttl = u64::try_from(self.ttl_hours.max(1) * 3600).unwrap_or(86_400);
        let mut conn = redis.conn.clone();
        conn.set_ex::<_, _, ()>(revocation_key(user_id), Utc::now().timestamp(), ttl).await?;
        Ok(())
    }

    async fn revoked_at(&self, user_id: i64) -> Option<i64> {
        let redis = self.revocations.as_ref()?;
        let mut conn = redis.conn.clone();
        match conn.get::<_, Option<i64>>(revocation_key(user_id)).await {
            Ok(at) => at,
            Err(e) => {
                warn!("Could not read token revocation for user {}: {:?}", user_id, e);
                None
            }
        }
    }

    /// Verifies the signature and expiry, then the revocation marker.
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, AppError> {
        let claims = self.verify(token)?;
        if is_revoked(claims.iat, self.revoked_at(claims.user_id).await) {
            return Err(AppError::unauthorized("TOKEN_REVOKED", "Token has been revoked, please log in again"));
        }
        Ok(AuthUser { user_id: claims.user_id, is_admin: claims.is_admin })
    }

    pub fn issue(&self, user_id: i64, is_admin: bool) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            is_admin,
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.ttl_hours)).timestamp(),
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::default(), claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("token encoding failed: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => {
                    AppError::unauthorized("TOKEN_EXPIRED", "Token has expired")
                }
                _ => AppError::unauthorized("INVALID_TOKEN", "Invalid token"),
            })
    }
}

impl FromRef<Arc<crate::AppState>> for JwtKeys {
    fn from_ref(state: &Arc<crate::AppState>) -> Self {
        state.jwt.clone()
    }
}

/// Authenticated caller, decoded from the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
    pub is_admin: bool,
}

impl AuthUser {
    /// Owners and admins may act on a record; everybody else gets 403.
    pub fn ensure_owner_or_admin(&self, owner_id: i64) -> Result<(), AppError> {
        if self.is_admin || self.user_id == owner_id {
            Ok(())
        } else {
            Err(AppError::Forbidden("You do not have access to this resource".to_string()))
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<Option<&str>, AppError> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized("INVALID_TOKEN", "Invalid token"))?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("INVALID_TOKEN", "Malformed authorization header"))?;
    Ok(Some(token))
}

impl<S> FromRequestParts<S> for AuthUser
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?
            .ok_or_else(|| AppError::unauthorized("NO_TOKEN", "Access denied. No token provided"))?;

        JwtKeys::from_ref(state).authenticate(token).await
    }
}

/// Authenticated caller whose token carries `isAdmin = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// Caller that may or may not be signed in. A missing header yields
/// `None`; a present but invalid token is still rejected.
#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match bearer_token(parts)? {
            None => Ok(MaybeAuthUser(None)),
            Some(token) => Ok(MaybeAuthUser(Some(JwtKeys::from_ref(state).authenticate(token).await?))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-value";

    #[test]
    fn issued_token_round_trips_claims() {
        let keys = JwtKeys::new(SECRET, 24);
        let token = keys.issue(42, true).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert!(claims.is_admin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_reports_token_expired() {
        let keys = JwtKeys::new(SECRET, 24);
        let past = Utc::now() - Duration::hours(2);
        let token = keys
            .sign(&Claims {
                user_id: 1,
                is_admin: false,
                iat: (past - Duration::hours(1)).timestamp(),
                exp: past.timestamp(),
            })
            .unwrap();

        match keys.verify(&token) {
            Err(AppError::Unauthorized { code, .. }) => assert_eq!(code, "TOKEN_EXPIRED"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn token_signed_with_another_secret_is_invalid() {
        let token = JwtKeys::new("some-other-secret-value", 1).issue(7, false).unwrap();
        match JwtKeys::new(SECRET, 1).verify(&token) {
            Err(AppError::Unauthorized { code, .. }) => assert_eq!(code, "INVALID_TOKEN"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn tokens_up_to_revocation_are_dead() {
        assert!(!is_revoked(1_700_000_000, None));
        assert!(is_revoked(1_700_000_000, Some(1_700_000_000)));
        assert!(is_revoked(1_699_999_000, Some(1_700_000_000)));
        assert!(!is_revoked(1_700_000_001, Some(1_700_000_000)));
    }

    #[test]
    fn owner_or_admin_check() {
        let user = AuthUser { user_id: 5, is_admin: false };
        assert!(user.ensure_owner_or_admin(5).is_ok());
        assert!(matches!(user.ensure_owner_or_admin(6), Err(AppError::Forbidden(_))));

        let admin = AuthUser { user_id: 1, is_admin: true };
        assert!(admin.ensure_owner_or_admin(6).is_ok());
    }
}
