//! Defines routes for bucket/object operations and presigned URL minting.
//!
//! ## Structure
//! - **Object-level endpoints** (optionally `?expires=&signature=`)
//!   - `PUT    /bucket/{bucket}/{key}` — upload object
//!   - `GET    /bucket/{bucket}/{key}` — download object
//!   - `DELETE /bucket/{bucket}/{key}` — delete object
//!
//! - **Bucket-level endpoints**
//!   - `GET    /bucket/{bucket}/list` — list keys
//!   - `GET    /bucket/{bucket}/presign/get` — mint a GET grant
//!   - `GET    /bucket/{bucket}/presign/put` — mint a PUT grant
//!   - `DELETE /bucket/{bucket}/presign/revoke` — revoke a grant
//!
//! Static segments win over `{key}`, so `list` is not addressable as a key.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, list_objects, upload_object},
        presign_handlers::{presign_get, presign_put, revoke},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{delete, get, put},
};

/// Build the router. Handlers share `AppState` (store + authorizer).
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Bucket-level routes
        .route("/bucket/{bucket}/list", get(list_objects))
        .route("/bucket/{bucket}/presign/get", get(presign_get))
        .route("/bucket/{bucket}/presign/put", get(presign_put))
        .route("/bucket/{bucket}/presign/revoke", delete(revoke))
        // Object-level routes
        .route(
            "/bucket/{bucket}/{key}",
            put(upload_object).get(get_object).delete(delete_object),
        )
}

/// Router with state attached, ready to serve.
pub fn app(state: AppState) -> Router {
    routes().with_state(state)
}
