//! Shared state handed to every handler.

use crate::services::{authorizer::Authorizer, storage_service::StorageService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub authorizer: Arc<Authorizer>,
}

impl AppState {
    pub fn new(storage: StorageService, authorizer: Arc<Authorizer>) -> Self {
        Self {
            storage,
            authorizer,
        }
    }
}
