// REST routes, one module per area of the marketplace.

mod accounts;
mod chat;
mod posts;
mod ratings;
mod reports;
mod requests;
mod stores;

use std::collections::HashMap;

use axum::extract::Multipart;
use axum::Json;
use axum::Router;
use inkhub_core::uploads::Upload;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn api() -> Router<AppState> {
    Router::new()
        .merge(accounts::routes())
        .merge(posts::routes())
        .merge(requests::routes())
        .merge(ratings::routes())
        .merge(chat::routes())
        .merge(stores::routes())
        .merge(reports::routes())
}

/// `{"message": ...}` body.
pub(crate) fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

/// A parsed `multipart/form-data` body. Empty file inputs are dropped.
#[derive(Debug, Default)]
pub(crate) struct Form {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, Upload>,
}

impl Form {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid form data: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {e}")))?;
                    if !file_name.is_empty() && !bytes.is_empty() {
                        form.files.insert(
                            name,
                            Upload {
                                file_name,
                                bytes: bytes.to_vec(),
                            },
                        );
                    }
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Invalid form field: {e}")))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name)
    }
}
