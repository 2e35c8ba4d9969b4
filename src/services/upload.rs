//! Attachment uploads.
//!
//! Accepted files land in the configured upload directory under a unique,
//! sanitized name and are served back under `/uploads`. The returned record
//! is what clients put in a message's `attachments`.

use std::path::Path;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::message::{Attachment, AttachmentKind};
use crate::frame::ErrorCode;

/// URL prefix the upload directory is served under.
pub const UPLOAD_URL_PREFIX: &str = "/uploads";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no file uploaded")]
    Missing,
    #[error("unsupported file type '{0}'")]
    UnsupportedType(String),
    #[error("file exceeds {0} bytes")]
    TooLarge(usize),
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for UploadError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing | Self::UnsupportedType(_) | Self::TooLarge(_) => "validation-error",
            Self::Io(_) => "persistence-error",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Upload response: the attachment record plus the declared content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    #[serde(flatten)]
    pub attachment: Attachment,
    pub mimetype: String,
}

/// Images, PDFs, word-processor, text and spreadsheet documents.
#[must_use]
pub fn accepted_kind(content_type: &str) -> Option<AttachmentKind> {
    let mime = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if mime.starts_with("image/") {
        return Some(AttachmentKind::Image);
    }
    let document = mime == "application/pdf"
        || mime.contains("word")
        || mime.contains("text")
        || mime.contains("spreadsheet");
    document.then_some(AttachmentKind::File)
}

/// Keep ASCII alphanumerics, `.` and `-`; everything else becomes `_`.
#[must_use]
pub fn sanitize_file_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() { "file".to_string() } else { cleaned.to_string() }
}

/// Validate and write one uploaded file.
///
/// # Errors
///
/// Unsupported type, oversize body, or a filesystem failure.
pub async fn save(
    dir: &Path,
    original_name: &str,
    content_type: &str,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<UploadedFile, UploadError> {
    let Some(kind) = accepted_kind(content_type) else {
        return Err(UploadError::UnsupportedType(content_type.to_string()));
    };
    if bytes.len() > max_bytes {
        return Err(UploadError::TooLarge(max_bytes));
    }

    let stored_name = format!("{}-{}-{}", crate::frame::now_ms(), Uuid::new_v4().simple(), sanitize_file_name(original_name));
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(&stored_name), bytes).await?;
    info!(file = %stored_name, size = bytes.len(), "upload: stored");

    Ok(UploadedFile {
        attachment: Attachment {
            kind,
            filename: original_name.to_string(),
            url: format!("{UPLOAD_URL_PREFIX}/{stored_name}"),
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
        },
        mimetype: content_type.to_string(),
    })
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
