// Chat messages and notifications.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use inkhub_core::chat::UnreadCount;
use inkhub_core::error::AppError;
use inkhub_core::model::{Chat, Notification, UserProfile};

use super::Form;
use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chats", get(messages).post(send_message))
        .route("/chats/{user_id}", get(conversation))
        .route("/user-chat-list", get(chat_list))
        .route("/notifications", get(notifications))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/{id}/read", post(mark_read))
}

async fn messages(State(market): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<Chat>>> {
    Ok(Json(market.messages(&auth.user)?))
}

async fn conversation(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<Chat>>> {
    Ok(Json(market.conversation(&auth.user, user_id)?))
}

async fn chat_list(
    State(market): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<UserProfile>>> {
    Ok(Json(market.chat_list(&auth.user)?))
}

/// Multipart fields: `receiver_id`, then `content` or `file`.
async fn send_message(
    State(market): State<AppState>,
    auth: AuthUser,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut form = Form::read(multipart).await?;
    let receiver_id = form
        .field("receiver_id")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::invalid("receiver_id", "The receiver id field is required."))?;
    let content = form.field("content").map(str::to_string);
    let file = form.take_file("file");

    let chat = market
        .send_message(&auth.user, receiver_id, content, file)
        .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn notifications(
    State(market): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(market.notifications(&auth.user)?))
}

async fn unread_count(
    State(market): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<UnreadCount>> {
    Ok(Json(market.unread_count(&auth.user)?))
}

async fn mark_read(
    State(market): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Notification>> {
    Ok(Json(market.mark_notification_read(&auth.user, id)?))
}
