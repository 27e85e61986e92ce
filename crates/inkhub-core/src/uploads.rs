// File uploads for chat attachments and post images.

use std::path::Path;

use anyhow::Context;
use tracing::debug;
use uuid::Uuid;

use crate::config::UploadsConfig;
use crate::error::{AppError, AppResult};

/// Extensions accepted for post images regardless of the chat allow-list.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// A file received from a multipart form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// Check extension and size. Returns the lowercased extension.
pub fn check_upload(
    config: &UploadsConfig,
    field: &str,
    upload: &Upload,
    allowed: &[&str],
) -> AppResult<String> {
    let ext = upload
        .extension()
        .filter(|e| allowed.contains(&e.as_str()))
        .ok_or_else(|| {
            AppError::invalid(
                field,
                format!("The {field} must be a file of type: {}.", allowed.join(", ")),
            )
        })?;

    let limit = config.max_kb * 1024;
    if upload.bytes.len() as u64 > limit {
        return Err(AppError::invalid(
            field,
            format!(
                "The {field} may not be greater than {} kilobytes.",
                config.max_kb
            ),
        ));
    }
    Ok(ext)
}

/// Write the upload under `{dir}/{subdir}/{uuid}.{ext}` and return the path
/// relative to the uploads dir.
pub async fn store_upload(
    config: &UploadsConfig,
    subdir: &str,
    upload: &Upload,
    ext: &str,
) -> AppResult<String> {
    let relative = format!("{subdir}/{}.{ext}", Uuid::new_v4());
    let full = Path::new(&config.dir).join(&relative);
    if let Some(parent) = full.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&full, &upload.bytes)
        .await
        .with_context(|| format!("failed to write upload {}", full.display()))?;
    debug!(path = %full.display(), bytes = upload.bytes.len(), "stored upload");
    Ok(relative)
}
