// Bearer-token extractors.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use inkhub_core::auth;
use inkhub_core::error::AppError;
use inkhub_core::model::{Role, User};

use crate::error::ApiError;
use crate::AppState;

/// The authenticated caller and the id of the token they presented.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token_id: i64,
}

/// An authenticated caller with the Admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

fn bearer(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer(parts).ok_or(AppError::Unauthorized)?;
        let (user, token_id) = auth::authenticate(&state.db, token)?;
        Ok(AuthUser { user, token_id })
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let AuthUser { user, .. } = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(AppError::Forbidden("This action is restricted to administrators.".into()).into());
        }
        Ok(AdminUser(user))
    }
}
