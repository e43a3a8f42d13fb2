use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::AppConfig, errors::ApiError, AppState};

/// Role names carried in JWT claims. The identity store is external; this
/// service only interprets the roles it is handed.
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MANAGER: &str = "manager";
pub const ROLE_SALES_STAFF: &str = "sales_staff";
pub const ROLE_SHIPPER: &str = "shipper";

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated caller, extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }

    /// Any back-office role, including manager and admin.
    pub fn is_staff(&self) -> bool {
        self.has_role(ROLE_SALES_STAFF)
            || self.has_role(ROLE_SHIPPER)
            || self.has_role(ROLE_MANAGER)
            || self.is_admin()
    }

    pub fn is_manager(&self) -> bool {
        self.has_role(ROLE_MANAGER) || self.is_admin()
    }
}

/// Issues a signed token for the given identity. Used by tooling and tests;
/// production tokens come from the identity service.
pub fn issue_token(config: &AppConfig, user: &AuthUser) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.user_id.to_string(),
        username: user.username.clone(),
        email: user.email.clone(),
        roles: user.roles.clone(),
        iat: now,
        exp: now + config.jwt_expiration as i64,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Unauthorized(format!("Failed to issue token: {}", e)))
}

fn decode_bearer(parts: &Parts, config: &AppConfig) -> Result<AuthUser, ApiError> {
    let header = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Expected bearer token".into()))?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;

    let user_id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| ApiError::Unauthorized("Invalid subject claim".into()))?;

    Ok(AuthUser {
        user_id,
        username: data.claims.username,
        email: data.claims.email,
        roles: data.claims.roles,
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        decode_bearer(parts, &app_state.config)
    }
}

/// Caller holding any back-office role.
#[derive(Debug, Clone)]
pub struct Staff(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for Staff
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff() {
            return Err(ApiError::Unauthorized("Staff role required".into()));
        }
        Ok(Staff(user))
    }
}

/// Caller holding the manager (or admin) role.
#[derive(Debug, Clone)]
pub struct Manager(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for Manager
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_manager() {
            return Err(ApiError::Unauthorized("Manager role required".into()));
        }
        Ok(Manager(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(roles: &[&str]) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            username: "linh".into(),
            email: "linh@example.com".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn manager_counts_as_staff() {
        assert!(test_user(&[ROLE_MANAGER]).is_staff());
        assert!(test_user(&[ROLE_ADMIN]).is_staff());
        assert!(test_user(&[ROLE_SHIPPER]).is_staff());
        assert!(!test_user(&["customer"]).is_staff());
    }

    #[test]
    fn sales_staff_is_not_manager() {
        assert!(!test_user(&[ROLE_SALES_STAFF]).is_manager());
        assert!(test_user(&[ROLE_MANAGER]).is_manager());
    }

    #[test]
    fn token_round_trip() {
        let config = AppConfig::new(
            "sqlite::memory:".into(),
            "super_secure_jwt_secret_that_is_long_enough_123".into(),
            3600,
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        let user = test_user(&[ROLE_SALES_STAFF]);
        let token = issue_token(&config, &user).unwrap();

        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(data.claims.sub, user.user_id.to_string());
        assert_eq!(data.claims.roles, vec![ROLE_SALES_STAFF.to_string()]);
    }
}
