use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use inkhub_core::model::{Rating, RatingSummary};
use inkhub_core::ratings::RatingInput;

use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ratings", post(post_rating))
        .route("/ratings/{id}", get(ratings_for).put(edit_rating))
        .route("/ratings/{id}/summary", get(rating_summary))
}

/// `id` is the rated user.
async fn ratings_for(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Rating>>> {
    Ok(Json(market.ratings_for(id, &auth.user)?))
}

async fn post_rating(
    State(market): State<AppState>,
    auth: AuthUser,
    Json(input): Json<RatingInput>,
) -> ApiResult<impl IntoResponse> {
    let rating = market.post_rating(&auth.user, &input)?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// `id` is the rating.
async fn edit_rating(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<RatingInput>,
) -> ApiResult<Json<Rating>> {
    Ok(Json(market.edit_rating(&auth.user, id, &input)?))
}

async fn rating_summary(
    State(market): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<RatingSummary>> {
    Ok(Json(market.rating_summary(id)?))
}
