//! Core data models for the presigned object store.
//!
//! `metadata` holds the persisted per-object index entries; `grant` holds the
//! ephemeral signed-URL capability types handed out by the authorizer.

pub mod grant;
pub mod metadata;
