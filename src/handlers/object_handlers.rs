//! HTTP handlers for object operations under `/bucket/{bucket}`.
//! Every handler runs the request through the `Authorizer` first, then
//! streams bodies to and from `StorageService` without buffering.

use crate::{
    errors::AppError,
    models::grant::{AccessRequest, Operation},
    services::authorizer::AuthError,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Optional presigned-URL parameters.
///
/// `expires` is kept as text so a malformed value is denied like any other
/// bad grant rather than rejected as a bad request.
#[derive(Debug, Default, Deserialize)]
pub struct SignedQuery {
    pub expires: Option<String>,
    pub signature: Option<String>,
}

fn authorize(
    state: &AppState,
    operation: Operation,
    bucket: &str,
    key: Option<&str>,
    query: SignedQuery,
) -> Result<(), AppError> {
    let expires = match query.expires {
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) => Some(value),
            Err(_) => {
                debug!(bucket, "unparseable expires parameter");
                return Err(AuthError::Denied.into());
            }
        },
        None => None,
    };
    let request = AccessRequest::new(operation, bucket, key.map(str::to_string))
        .with_signature(expires, query.signature);
    state.authorizer.authorize(&request)?;
    Ok(())
}

/// PUT `/bucket/{bucket}/{key}` — upload an object.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, Operation::Put, &bucket, Some(&key), query)?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    state.storage.save(&bucket, &key, stream).await?;
    Ok((StatusCode::OK, "Uploaded"))
}

/// GET `/bucket/{bucket}/{key}` — download an object as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, AppError> {
    authorize(&state, Operation::Get, &bucket, Some(&key), query)?;

    let (_meta, file) = state.storage.load(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(guess_content_type(&key)),
    );
    Ok(response)
}

/// DELETE `/bucket/{bucket}/{key}` — idempotent delete.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, Operation::Delete, &bucket, Some(&key), query)?;
    state.storage.delete(&bucket, &key).await?;
    Ok((StatusCode::OK, "Deleted"))
}

/// GET `/bucket/{bucket}/list` — key names in the bucket.
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Json<Vec<String>>, AppError> {
    authorize(&state, Operation::List, &bucket, None, query)?;
    Ok(Json(state.storage.list(&bucket).await?))
}

/// Content type hint from the key's extension.
fn guess_content_type(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::guess_content_type;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(guess_content_type("f.txt"), "text/plain");
        assert_eq!(guess_content_type("PHOTO.JPG"), "image/jpeg");
        assert_eq!(guess_content_type("archive.tar.gz"), "application/gzip");
        assert_eq!(guess_content_type("README"), "application/octet-stream");
        assert_eq!(guess_content_type("blob.unknown"), "application/octet-stream");
    }
}
