// Posts, tags and post images.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use inkhub_core::error::AppError;
use inkhub_core::model::{Page, Post, PostImage, Tag};
use inkhub_core::posts::PostInput;
use serde::Deserialize;
use serde_json::Value;

use super::{message, Form};
use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", put(update_post))
        .route("/delete-posts/{id}", delete(delete_post))
        .route("/posts/{id}/images", post(add_image))
        .route("/users/{id}/images", get(user_images))
        .route("/myposts", get(my_posts))
        .route("/clientposts", get(client_posts))
        .route("/search-posts", get(search_posts))
        .route("/search-by-tag", get(search_by_tag))
        .route("/tags", get(all_tags))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list_posts(
    State(market): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<Post>>> {
    Ok(Json(market.list_posts(query.page.unwrap_or(1), query.limit)?))
}

async fn create_post(
    State(market): State<AppState>,
    auth: AuthUser,
    Json(input): Json<PostInput>,
) -> ApiResult<impl IntoResponse> {
    let post = market.create_post(&auth.user, &input)?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn update_post(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<PostInput>,
) -> ApiResult<Json<Post>> {
    Ok(Json(market.update_post(&auth.user, id, &input)?))
}

async fn delete_post(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    market.delete_post(&auth.user, id)?;
    Ok(message("Post deleted successfully."))
}

async fn add_image(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut form = Form::read(multipart).await?;
    let upload = form
        .take_file("image")
        .ok_or_else(|| AppError::invalid("image", "The image field is required."))?;
    let image = market.add_post_image(&auth.user, id, &upload).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

async fn user_images(
    State(market): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<PostImage>>> {
    Ok(Json(market.user_images(id)?))
}

async fn my_posts(State(market): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<Post>>> {
    Ok(Json(market.my_posts(&auth.user)?))
}

async fn client_posts(State(market): State<AppState>) -> ApiResult<Json<Vec<Post>>> {
    Ok(Json(market.client_posts()?))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn search_posts(
    State(market): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Post>>> {
    Ok(Json(market.search_posts(query.q.as_deref().unwrap_or_default())?))
}

#[derive(Debug, Deserialize)]
struct TagQuery {
    tag: Option<String>,
}

async fn search_by_tag(
    State(market): State<AppState>,
    Query(query): Query<TagQuery>,
) -> ApiResult<Json<Vec<Post>>> {
    Ok(Json(market.search_by_tag(query.tag.as_deref())?))
}

async fn all_tags(State(market): State<AppState>) -> ApiResult<Json<Vec<Tag>>> {
    Ok(Json(market.all_tags()?))
}
