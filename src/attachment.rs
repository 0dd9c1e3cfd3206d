//! Photo attachments for health entries. An attachment is a `data:` URL kept
//! on the device that added it; it never leaves through sync.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use infer::Infer;
use mime_guess::MimeGuess;

use crate::{AppError, AppResult};

/// Largest file accepted as an attachment.
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

fn detect_mime(bytes: &[u8], path: &Path) -> String {
    if let Some(kind) = Infer::new().get(bytes) {
        return kind.mime_type().to_string();
    }
    MimeGuess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Read an image from disk and encode it as a `data:` URL.
pub fn attachment_from_file(path: &Path) -> AppResult<String> {
    let size = std::fs::metadata(path)
        .map_err(|err| AppError::from(err).with_context("path", path.display().to_string()))?
        .len();
    if size > MAX_ATTACHMENT_BYTES {
        return Err(AppError::new(
            "ATTACHMENT/TOO_LARGE",
            format!("Attachments are limited to {} MB", MAX_ATTACHMENT_BYTES / (1024 * 1024)),
        )
        .with_context("path", path.display().to_string())
        .with_context("size_bytes", size.to_string()));
    }

    let bytes = std::fs::read(path)
        .map_err(|err| AppError::from(err).with_context("path", path.display().to_string()))?;
    let mime = detect_mime(&bytes, path);
    if !mime.starts_with("image/") {
        return Err(
            AppError::new("ATTACHMENT/NOT_IMAGE", "Only image files can be attached")
                .with_context("path", path.display().to_string())
                .with_context("mime", mime),
        );
    }
    Ok(data_url(&mime, &bytes))
}
