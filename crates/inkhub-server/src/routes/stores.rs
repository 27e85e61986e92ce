use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use inkhub_core::model::Store;
use inkhub_core::stores::{StoreInput, UserStore};
use serde_json::Value;

use super::message;
use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stores", get(list_stores).post(create_store))
        .route("/stores/{id}", put(update_store).delete(delete_store))
        .route("/user-store/{user_id}", get(user_store))
}

async fn list_stores(State(market): State<AppState>) -> ApiResult<Json<Vec<Store>>> {
    Ok(Json(market.list_stores()?))
}

async fn create_store(
    State(market): State<AppState>,
    auth: AuthUser,
    Json(input): Json<StoreInput>,
) -> ApiResult<impl IntoResponse> {
    let store = market.create_store(&auth.user, &input)?;
    Ok((StatusCode::CREATED, Json(store)))
}

async fn update_store(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<StoreInput>,
) -> ApiResult<Json<Store>> {
    Ok(Json(market.update_store(&auth.user, id, &input)?))
}

async fn delete_store(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    market.delete_store(&auth.user, id)?;
    Ok(message("Store deleted successfully."))
}

async fn user_store(
    State(market): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<UserStore>> {
    Ok(Json(market.user_store(user_id)?))
}
