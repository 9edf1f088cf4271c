//! Core services: signing, the presigned-URL registry, the authorizer that
//! composes them, and the disk-backed object store.

pub mod authorizer;
pub mod registry;
pub mod signer;
pub mod storage_service;
