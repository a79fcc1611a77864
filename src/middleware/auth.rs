use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::sync::Arc;

use crate::api::AppState;
use crate::db::models::User;
use crate::error::ApiError;

/// Extractor for authenticated routes. Resolves the bearer token to a user row
/// on every request; revoking a token takes effect immediately.
pub struct AuthUser(pub User);

/// AuthUser plus the is_admin flag.
pub struct AdminUser(pub User);

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))
}

async fn user_for_token(state: &AppState, token: &str) -> Result<User, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE api_token = $1")
        .bind(token)
        .fetch_optional(&state.db_pool)
        .await?;

    user.ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user = user_for_token(state, token).await?;
        Ok(AuthUser(user))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user = user_for_token(state, token).await?;

        if !user.is_admin {
            return Err(ApiError::Forbidden(
                "this endpoint requires an admin account".to_string(),
            ));
        }
        Ok(AdminUser(user))
    }
}
