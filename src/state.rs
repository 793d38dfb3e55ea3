//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    services::{record_store::SqliteRecordStore, upload_service::UploadService},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub records: SqliteRecordStore,
    pub cv_url: Arc<str>,
    /// Upper bound for a single chunk body, on both chunk endpoints.
    pub max_chunk_bytes: usize,
}

impl AppState {
    pub fn new(uploads: UploadService, records: SqliteRecordStore, cfg: &AppConfig) -> Self {
        Self {
            uploads,
            records,
            cv_url: Arc::from(cfg.cv_url.as_str()),
            max_chunk_bytes: cfg.max_body_bytes,
        }
    }
}
