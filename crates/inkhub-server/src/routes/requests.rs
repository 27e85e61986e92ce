// Service requests, payments and the PayMongo webhook.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use inkhub_core::model::{InitialPayment, ServiceRequest};
use inkhub_core::payments::{CheckoutStarted, RemainingPaymentStarted, RequestInput};
use inkhub_paymongo::{parse_event, verify_signature, SIGNATURE_HEADER};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::message;
use crate::error::{ApiError, ApiResult};
use crate::extract::{AdminUser, AuthUser};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/requests", post(create_request))
        .route("/payforproduct", post(pay_for_product))
        .route("/payforproduct80/{request_id}", post(pay_remaining))
        .route("/requests/{id}/respond", post(respond))
        .route("/requests-with-payments/{user_id}", get(requests_with_payments))
        .route("/payments/{id}/refund", post(refund))
        .route("/webhooks/paymongo", post(paymongo_webhook))
}

async fn create_request(
    State(market): State<AppState>,
    auth: AuthUser,
    Json(input): Json<RequestInput>,
) -> ApiResult<impl IntoResponse> {
    let created = market.create_request(&auth.user, &input)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn pay_for_product(
    State(market): State<AppState>,
    auth: AuthUser,
    Json(input): Json<RequestInput>,
) -> ApiResult<Json<CheckoutStarted>> {
    Ok(Json(market.pay_for_product(&auth.user, &input).await?))
}

async fn pay_remaining(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<i64>,
) -> ApiResult<Json<RemainingPaymentStarted>> {
    Ok(Json(market.pay_remaining(&auth.user, request_id).await?))
}

#[derive(Debug, Deserialize)]
struct RespondBody {
    accept: bool,
}

async fn respond(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<RespondBody>,
) -> ApiResult<Json<ServiceRequest>> {
    Ok(Json(market.respond_to_request(&auth.user, id, body.accept)?))
}

async fn requests_with_payments(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
) -> ApiResult<Response> {
    let requests = market.requests_with_payments(&auth.user, user_id)?;
    if requests.is_empty() {
        return Ok(message("No requests found for this user.").into_response());
    }
    Ok(Json(requests).into_response())
}

async fn refund(
    State(market): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<InitialPayment>> {
    let payment = market.refund(id)?;
    info!(payment_id = id, admin = admin.id, "refund issued");
    Ok(Json(payment))
}

/// Signature is only enforced when a webhook secret is configured.
async fn paymongo_webhook(
    State(market): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let secret = market
        .config
        .credentials
        .paymongo_webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty());
    if let Some(secret) = secret {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        verify_signature(secret, header, &body).map_err(|e| {
            warn!("rejected webhook: {e}");
            ApiError::bad_request("Invalid webhook signature.")
        })?;
    }

    let event = parse_event(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let confirmed = match event.paid_checkout_session() {
        Some(session_id) => market.confirm_checkout(session_id)?.is_some(),
        None => {
            info!(event_type = %event.event_type, "ignoring webhook event");
            false
        }
    };
    Ok(Json(json!({ "received": true, "confirmed": confirmed })))
}
