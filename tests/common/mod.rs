//! Shared test fixtures.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use async_trait::async_trait;
use bytes::Bytes;
use folio_api::{
    config::AppConfig,
    models::upload::FinishedUpload,
    routes::routes::app,
    services::{
        record_store::{RecordError, RecordResult, RecordStore, SqliteRecordStore},
        staging::StagingArea,
        upload_service::UploadService,
    },
    state::AppState,
};
use futures::{Stream, stream};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    io,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tempfile::TempDir;
use uuid::Uuid;

/// Record store double that keeps finished uploads in memory and can be told
/// to fail.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingStore {
    pub uploads: Mutex<Vec<FinishedUpload>>,
    pub fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn recorded(&self) -> Vec<FinishedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn persist_finished_upload(&self, upload: &FinishedUpload) -> RecordResult<Uuid> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RecordError::Unavailable("injected failure".into()));
        }
        self.uploads.lock().unwrap().push(upload.clone());
        Ok(upload.id)
    }
}

/// An `UploadService` over a temporary storage root.
#[allow(dead_code)]
pub struct TestUploads {
    pub service: UploadService,
    pub records: Arc<RecordingStore>,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TestUploads {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let staging = StagingArea::new(dir.path());
        staging.prepare().await.expect("Failed to prepare staging");
        let records = Arc::new(RecordingStore::default());
        let service = UploadService::new(staging, records.clone());
        Self {
            service,
            records,
            dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Names of the assembled files currently in `files/`.
    pub fn finished_files(&self) -> Vec<String> {
        list_names(&self.root().join("files"))
    }
}

/// Full router over in-memory SQLite and a temporary storage root.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(AppConfig {
            cv_url: "https://cdn.example.com/cv.pdf".into(),
            ..AppConfig::default()
        })
        .await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let staging = StagingArea::new(temp_dir.path());
        staging.prepare().await.expect("Failed to prepare staging");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open SQLite");
        let records = SqliteRecordStore::new(Arc::new(pool));
        records.migrate().await.expect("Failed to migrate");

        let uploads = UploadService::new(staging, Arc::new(records.clone()));
        let state = AppState::new(uploads, records, &config);
        let router = app(state.clone(), &config);

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }
}

/// Feed `data` to the service in small pieces, like a network body.
#[allow(dead_code)]
pub fn body_stream(data: &[u8]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let pieces: Vec<io::Result<Bytes>> = data
        .chunks(333)
        .map(|piece| Ok(Bytes::copy_from_slice(piece)))
        .collect();
    stream::iter(pieces)
}

#[allow(dead_code)]
pub fn list_names(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}

/// Every path below `dir`, relative, sorted.
#[allow(dead_code)]
pub fn tree(dir: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            out.push(path.strip_prefix(base).unwrap().display().to_string());
            if path.is_dir() {
                walk(base, &path, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}
