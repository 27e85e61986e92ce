// Registration, sessions, verification, password reset and user admin.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use inkhub_core::accounts::{LoginInput, LoginResponse, PersonalInformationInput, RegisterInput};
use inkhub_core::model::{Page, PersonalInformation, User, UserProfile};
use inkhub_core::password_reset::ResetInput;
use serde::Deserialize;
use serde_json::{json, Value};

use super::message;
use crate::error::ApiResult;
use crate::extract::{AdminUser, AuthUser};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/current-user", get(current_user))
        .route("/users", get(list_users))
        .route("/updateUsers/{id}", post(set_verified))
        .route(
            "/users/{id}/personal_information",
            get(personal_information).put(save_personal_information),
        )
        .route("/verify-email", get(verify_link).post(verify_code))
        .route("/verify-email/resend", post(resend_code))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

async fn register(
    State(market): State<AppState>,
    Json(input): Json<RegisterInput>,
) -> ApiResult<impl IntoResponse> {
    let user = market.register(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Registration successful. Check your email for the verification code.",
            "user": user,
        })),
    ))
}

async fn login(
    State(market): State<AppState>,
    Json(input): Json<LoginInput>,
) -> ApiResult<Json<LoginResponse>> {
    Ok(Json(market.login(&input)?))
}

async fn logout(State(market): State<AppState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    market.logout(auth.token_id)?;
    Ok(message("Logged out successfully."))
}

async fn current_user(
    State(market): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(market.current_user(auth.user)?))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
}

async fn list_users(
    State(market): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<User>>> {
    Ok(Json(market.list_users(query.page.unwrap_or(1))?))
}

#[derive(Debug, Deserialize)]
struct VerifiedBody {
    verified: bool,
}

async fn set_verified(
    State(market): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(body): Json<VerifiedBody>,
) -> ApiResult<Json<Value>> {
    let user = market.set_verified(id, body.verified)?;
    Ok(Json(json!({ "message": "User updated successfully.", "user": user })))
}

async fn personal_information(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Option<PersonalInformation>>> {
    Ok(Json(market.personal_information(&auth.user, id)?))
}

async fn save_personal_information(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<PersonalInformationInput>,
) -> ApiResult<Json<PersonalInformation>> {
    Ok(Json(market.save_personal_information(&auth.user, id, input)?))
}

#[derive(Debug, Deserialize)]
struct VerifyLinkQuery {
    id: i64,
    hash: String,
}

async fn verify_link(
    State(market): State<AppState>,
    Query(query): Query<VerifyLinkQuery>,
) -> ApiResult<Json<Value>> {
    Ok(message(market.verify_link(query.id, &query.hash)?))
}

#[derive(Debug, Deserialize)]
struct VerifyCodeBody {
    id: i64,
    code: String,
}

async fn verify_code(
    State(market): State<AppState>,
    Json(body): Json<VerifyCodeBody>,
) -> ApiResult<Json<Value>> {
    Ok(message(market.verify_code(body.id, &body.code)?))
}

#[derive(Debug, Deserialize)]
struct EmailBody {
    email: String,
}

async fn resend_code(
    State(market): State<AppState>,
    Json(body): Json<EmailBody>,
) -> ApiResult<Json<Value>> {
    market.resend_code(&body.email).await?;
    Ok(message("A new verification code has been sent to your email."))
}

async fn forgot_password(
    State(market): State<AppState>,
    Json(body): Json<EmailBody>,
) -> ApiResult<Json<Value>> {
    Ok(message(market.send_reset_link(&body.email).await?))
}

async fn reset_password(
    State(market): State<AppState>,
    Json(input): Json<ResetInput>,
) -> ApiResult<Json<Value>> {
    Ok(message(market.reset_password(&input)?))
}
