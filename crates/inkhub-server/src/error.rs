// HTTP mapping for domain errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use inkhub_core::error::AppError;
use serde_json::json;
use tracing::{error, warn};

/// Wrapper so handlers can `?` any `AppError` into a response.
#[derive(Debug)]
pub struct ApiError(pub AppError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(AppError::Internal(err))
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError(AppError::BadRequest(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.0 {
            AppError::Validation(errors) => json!({
                "message": errors.first_message().unwrap_or("The given data was invalid."),
                "errors": errors,
            }),
            AppError::Internal(err) => {
                error!("internal error: {err:#}");
                json!({ "error": "Internal server error." })
            }
            AppError::Gateway(message) => {
                warn!(%message, "payment gateway failure");
                json!({ "error": format!("Payment gateway error: {message}") })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_of(err: AppError) -> (StatusCode, Value) {
        let response = ApiError(err).into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_body_is_field_map() {
        let (status, body) = body_of(AppError::invalid("email", "The email has already been taken.")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "The email has already been taken.");
        assert_eq!(body["errors"]["email"][0], "The email has already been taken.");
    }

    #[tokio::test]
    async fn statuses_follow_variant() {
        let cases = [
            (AppError::not_found("Post"), StatusCode::NOT_FOUND, "Post not found"),
            (AppError::Forbidden("no".into()), StatusCode::FORBIDDEN, "no"),
            (AppError::BadRequest("bad".into()), StatusCode::BAD_REQUEST, "bad"),
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED, "Unauthenticated."),
            (AppError::InvalidCredentials, StatusCode::UNAUTHORIZED, "Invalid credentials."),
        ];
        for (err, status, message) in cases {
            let (got, body) = body_of(err).await;
            assert_eq!(got, status);
            assert_eq!(body["error"], message);
        }
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let (status, body) = body_of(AppError::Internal(anyhow::anyhow!("disk on fire"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error.");

        let (status, _) = body_of(AppError::Gateway("timeout".into())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
