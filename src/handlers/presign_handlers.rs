//! Minting and revocation of presigned URLs.
//!
//! - `GET    /bucket/{bucket}/presign/get?key=&ttlSeconds=`
//! - `GET    /bucket/{bucket}/presign/put?key=&ttlSeconds=`
//! - `DELETE /bucket/{bucket}/presign/revoke?url=`
//!
//! Both are owner operations: they pass the authorizer only while unsigned
//! access is enabled, and no presigned URL can stand in for them.

use crate::{
    errors::AppError,
    models::grant::{AccessRequest, GrantMethod, Operation, PresignedGrant},
    services::authorizer::DEFAULT_GRANT_TTL_SECS,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub key: String,
    #[serde(rename = "ttlSeconds", default = "default_ttl")]
    pub ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    DEFAULT_GRANT_TTL_SECS
}

#[derive(Debug, Deserialize)]
pub struct RevokeQuery {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

/// `GET /bucket/{bucket}/presign/get`
pub async fn presign_get(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<PresignQuery>,
) -> Result<Json<PresignedGrant>, AppError> {
    mint(&state, GrantMethod::Get, &bucket, q)
}

/// `GET /bucket/{bucket}/presign/put`
pub async fn presign_put(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<PresignQuery>,
) -> Result<Json<PresignedGrant>, AppError> {
    mint(&state, GrantMethod::Put, &bucket, q)
}

/// `DELETE /bucket/{bucket}/presign/revoke` — revoke a grant before it expires.
pub async fn revoke(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<RevokeQuery>,
) -> Result<(StatusCode, Json<RevokeResponse>), AppError> {
    let request = AccessRequest::new(Operation::Presign, &bucket, None);
    state.authorizer.authorize(&request)?;

    let canonical = state.authorizer.canonical_form(&q.url);
    if !canonical.starts_with(&format!("/bucket/{}/", bucket)) {
        return Err(AppError::bad_request("url does not belong to this bucket"));
    }
    let revoked = state.authorizer.revoke(&q.url);
    Ok((StatusCode::OK, Json(RevokeResponse { revoked })))
}

fn mint(
    state: &AppState,
    method: GrantMethod,
    bucket: &str,
    q: PresignQuery,
) -> Result<Json<PresignedGrant>, AppError> {
    let request = AccessRequest::new(Operation::Presign, bucket, Some(q.key.clone()));
    state.authorizer.authorize(&request)?;

    // Names are validated here so a grant is never minted for a path the
    // store would refuse.
    state.storage.validate_names(bucket, &q.key)?;
    let grant = state
        .authorizer
        .mint(method, bucket, &q.key, q.ttl_seconds);
    Ok(Json(grant))
}
