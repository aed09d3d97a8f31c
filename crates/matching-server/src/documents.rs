/// Text extraction from uploaded vendor profiles.
use crate::error::AppError;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Validate an upload and return its text.
///
/// PDF extraction is CPU-bound and runs on a blocking thread.
pub async fn extract_text(
    filename: &str,
    bytes: Vec<u8>,
    max_size: usize,
) -> Result<String, AppError> {
    if filename.trim().is_empty() {
        return Err(AppError::validation("No file provided"));
    }
    let ext = extension(filename).ok_or_else(|| {
        AppError::validation(format!(
            "Unsupported file type. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))
    })?;
    if bytes.is_empty() {
        return Err(AppError::validation("File is empty"));
    }
    if bytes.len() > max_size {
        return Err(AppError::validation(format!(
            "File too large. Max size: {:.1}MB",
            max_size as f64 / (1024.0 * 1024.0)
        )));
    }

    let text = match ext.as_str() {
        "pdf" => tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| AppError::validation(format!("PDF extraction aborted: {e}")))?
            .map_err(|e| AppError::validation(format!("Could not read PDF: {e}")))?,
        _ => String::from_utf8(bytes)
            .map_err(|_| AppError::validation("Text file is not valid UTF-8"))?,
    };

    if text.trim().is_empty() {
        return Err(AppError::validation("Empty or invalid document"));
    }
    Ok(text)
}
