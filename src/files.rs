use std::path::{Component, PathBuf};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::{error::ApiError, server::AppState};

/// `GET /download/{filename}`: streams a finished download out of the fixed
/// download directory as an attachment. Anything that is not a plain file
/// name inside that directory is a 404.
pub async fn serve_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if !is_plain_file_name(&filename) {
        warn!(filename = %filename, "rejected download path outside the download root");
        return Err(not_found());
    }

    let root = tokio::fs::canonicalize(state.download_dir())
        .await
        .map_err(|_| not_found())?;

    let resolved = tokio::fs::canonicalize(root.join(&filename))
        .await
        .map_err(|_| not_found())?;

    // Symlinks inside the directory can still point elsewhere.
    if !resolved.starts_with(&root) {
        warn!(path = %resolved.display(), "blocked a file outside the download root");
        return Err(not_found());
    }

    let metadata = tokio::fs::metadata(&resolved).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    let file = tokio::fs::File::open(&resolved)
        .await
        .map_err(|error| ApiError::internal("Could not open the requested file.")
            .with_details(error.to_string()))?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::internal("Could not build the download size header."))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    Ok((headers, body).into_response())
}

fn not_found() -> ApiError {
    ApiError::not_found("File not found.")
}

/// True only for a single normal path component: no separators, no `..`,
/// no absolute paths.
fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return false;
    }

    let mut components = std::path::Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = PathBuf::from(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "opus" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_') {
                character
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches('_').is_empty() {
        "download.bin".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn plain_file_names_are_accepted() {
        assert!(is_plain_file_name("Example-abc123.mp3"));
        assert!(is_plain_file_name("clip.mp4"));
    }

    #[test]
    fn traversal_and_separator_names_are_rejected() {
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../etc/passwd"));
        assert!(!is_plain_file_name("..\\windows"));
        assert!(!is_plain_file_name("/etc/passwd"));
        assert!(!is_plain_file_name("nested/clip.mp4"));
        assert!(!is_plain_file_name(""));
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for_filename("a.mp3"), "audio/mpeg");
        assert_eq!(content_type_for_filename("a.MP4"), "video/mp4");
        assert_eq!(content_type_for_filename("a.unknown"), "application/octet-stream");
    }

    #[test]
    fn disposition_quotes_an_ascii_safe_name() {
        let header = build_content_disposition("clip ñ.mp4");
        assert!(header.starts_with("attachment; filename=\"clip__.mp4\""));
        assert!(header.contains("filename*=UTF-8''clip%20%C3%B1.mp4"));
    }
}
