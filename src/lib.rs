//! Object storage with HMAC-signed, time-limited presigned URLs.
//!
//! Objects live on local disk under `{bucket}/{key}` with a JSON metadata
//! index beside them. Requests may carry `expires` + `signature` parameters
//! minted by [`services::authorizer::Authorizer`]; whether unsigned requests
//! are admitted is a configuration switch.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
