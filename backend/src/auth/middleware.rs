use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use super::jwt;
use crate::error::AppError;
use crate::AppState;
use sigflow_shared::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    /// Unknown roles get the least privilege
    pub fn parse(value: &str) -> Self {
        match value {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }
}

/// Authenticated, active user of the organization the token is scoped to
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub role: Role,
}

impl AuthUser {
    pub fn organization_id(&self) -> Uuid {
        self.user.organization_id
    }

    /// Mutations, workflow tests and reprocessing are for owners and admins
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role >= Role::Admin {
            Ok(())
        } else {
            Err(AppError::InsufficientPermissions {
                required: "admin".to_string(),
            })
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let auth_header = parts
        .headers
        .get("authorization")
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization format".to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).map_err(IntoResponse::into_response)?;

        let token_data = jwt::verify_jwt(token, &state.jwt_secret).map_err(|e| AppError::from(e).into_response())?;
        let claims = token_data.claims;

        let user = state
            .stores
            .directory
            .get_user(claims.sub)
            .await
            .map_err(|e| AppError::from(e).into_response())?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::Unauthorized("User not found or inactive".to_string()).into_response())?;

        if user.organization_id != claims.org {
            return Err(AppError::Unauthorized("Token does not match the user's organization".to_string()).into_response());
        }

        let role = Role::parse(&user.role);
        Ok(AuthUser { user, role })
    }
}

/// Caller of the cron endpoints, authenticated by the shared secret
#[derive(Debug, Clone, Copy)]
pub struct CronCaller;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CronCaller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.cron_secret.as_deref() else {
            tracing::warn!("Rejected cron request: CRON_SECRET is not configured");
            return Err(AppError::Unauthorized("Cron endpoints are disabled".to_string()).into_response());
        };

        let token = bearer_token(parts).map_err(IntoResponse::into_response)?;
        if !constant_time_eq(token.as_bytes(), secret.as_bytes()) {
            tracing::warn!("Rejected cron request with a mismatched secret");
            return Err(AppError::Unauthorized("Invalid cron secret".to_string()).into_response());
        }

        Ok(CronCaller)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
