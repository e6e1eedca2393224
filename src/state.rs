//! Shared state handed to every HTTP handler.

use std::sync::Arc;

use crate::{config::SweepSettings, services::storage_service::StorageService};

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub sweep: Arc<SweepSettings>,
}

impl AppState {
    pub fn new(storage: StorageService, sweep: SweepSettings) -> Self {
        Self {
            storage,
            sweep: Arc::new(sweep),
        }
    }
}
