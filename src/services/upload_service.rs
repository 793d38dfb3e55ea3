//! src/services/upload_service.rs
//!
//! UploadService — the chunked upload protocol. Sessions are initiated,
//! filled chunk by chunk (in any order, with retries) and finally assembled
//! into a single file under `files/`. The assembled file is handed to the
//! record store exactly once, after it has been fully written and renamed
//! into place.

use crate::{
    models::upload::{FinishedUpload, UploadSession},
    services::{
        record_store::{RecordError, RecordStore},
        staging::StagingArea,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use md5::Context;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
    sync::RwLock,
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload_id `{0}`")]
    InvalidSession(String),
    #[error("missing chunk {index} for upload `{upload_id}`")]
    MissingChunk { upload_id: Uuid, index: u32 },
    #[error("chunk index {index} out of range, upload expects {total_chunks} chunks")]
    ChunkOutOfRange { index: u32, total_chunks: u32 },
    #[error("invalid upload request: {0}")]
    InvalidRequest(String),
    #[error("chunk body exceeds the {limit} byte limit")]
    ChunkTooLarge { limit: usize },
    #[error("chunk body aborted by client: {0}")]
    BodyAborted(String),
    #[error("session metadata for `{upload_id}` is unreadable: {source}")]
    CorruptSession {
        upload_id: Uuid,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    /// Classify an error raised while copying a chunk body. Errors the
    /// transport tagged with a `ChunkBodyError` are the client's, anything
    /// else is local storage.
    pub fn from_chunk_io(err: io::Error) -> Self {
        match err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ChunkBodyError>())
        {
            Some(ChunkBodyError::TooLarge { limit }) => UploadError::ChunkTooLarge { limit: *limit },
            Some(ChunkBodyError::Aborted(reason)) => UploadError::BodyAborted(reason.clone()),
            None => UploadError::Io(err),
        }
    }
}

/// Failure of the incoming chunk body itself, as opposed to the disk it is
/// written to. Carried inside `io::Error` through the streaming copy.
#[derive(Debug, Error)]
pub enum ChunkBodyError {
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("{0}")]
    Aborted(String),
}

impl ChunkBodyError {
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

/// Parameters of `initiate`, as declared by the client.
#[derive(Clone, Debug)]
pub struct InitiateUpload {
    pub filename: String,
    pub total_chunks: u32,
    pub mime_type: String,
    pub declared_size: u64,
}

/// Acknowledgment for a stored chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub index: u32,
    pub size_bytes: u64,
}

const COPY_BUF_SIZE: usize = 1024 * 1024;
const MAX_FILENAME_LEN: usize = 200;
const FALLBACK_FILENAME: &str = "upload";
const MIN_REAP_PERIOD: Duration = Duration::from_secs(1);

/// Entries live only while some call holds or waits on them; see
/// `release_lock`.
type SessionLocks = Arc<Mutex<HashMap<Uuid, Arc<RwLock<()>>>>>;

/// Drives a chunked upload from initiate to finalize.
///
/// Chunk writes for a session hold the shared side of that session's lock,
/// `complete` and reaping hold the exclusive side. Sessions never share a
/// lock, so unrelated uploads proceed independently.
#[derive(Clone)]
pub struct UploadService {
    staging: StagingArea,
    records: Arc<dyn RecordStore>,
    locks: SessionLocks,
}

impl UploadService {
    pub fn new(staging: StagingArea, records: Arc<dyn RecordStore>) -> Self {
        Self {
            staging,
            records,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Start a new session and persist its metadata into a fresh staging
    /// namespace.
    pub async fn initiate(&self, req: InitiateUpload) -> UploadResult<UploadSession> {
        if req.total_chunks == 0 {
            return Err(UploadError::InvalidRequest(
                "total_chunks must be a positive integer".into(),
            ));
        }

        let session = UploadSession {
            id: Uuid::new_v4(),
            filename: req.filename,
            total_chunks: req.total_chunks,
            mime_type: req.mime_type,
            declared_size: req.declared_size,
            created_at: Utc::now(),
        };
        self.staging.create_session(&session).await?;

        info!(
            upload_id = %session.id,
            filename = %session.filename,
            total_chunks = session.total_chunks,
            "upload session initiated"
        );
        Ok(session)
    }

    /// Store the bytes of chunk `index`, replacing any earlier write of the
    /// same index.
    pub async fn put_chunk<S>(
        &self,
        upload_id: &str,
        index: u32,
        stream: S,
    ) -> UploadResult<ChunkReceipt>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let id = parse_upload_id(upload_id)?;
        // Unknown sessions are rejected before a lock entry is created.
        self.staging.load_session(id).await?;

        let lock = self.session_lock(id);
        let result = self.put_chunk_locked(&lock, id, index, stream).await;
        self.release_lock(id, lock);
        result
    }

    async fn put_chunk_locked<S>(
        &self,
        lock: &RwLock<()>,
        id: Uuid,
        index: u32,
        stream: S,
    ) -> UploadResult<ChunkReceipt>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let _guard = lock.read().await;
        let session = self.staging.load_session(id).await?;
        if !session.contains_index(index) {
            return Err(UploadError::ChunkOutOfRange {
                index,
                total_chunks: session.total_chunks,
            });
        }

        let size_bytes = self.staging.write_chunk(&session, index, stream).await?;
        debug!(upload_id = %id, index, size_bytes, "chunk stored");
        Ok(ChunkReceipt { index, size_bytes })
    }

    /// Assemble every chunk of the session into its final file, hand the
    /// result to the record store and reclaim the staging namespace.
    ///
    /// A missing chunk leaves the session untouched so the client can send it
    /// and call `complete` again.
    pub async fn complete(&self, upload_id: &str) -> UploadResult<FinishedUpload> {
        let id = parse_upload_id(upload_id)?;
        self.staging.load_session(id).await?;

        let lock = self.session_lock(id);
        let result = self.complete_locked(&lock, id).await;
        self.release_lock(id, lock);
        result
    }

    async fn complete_locked(&self, lock: &RwLock<()>, id: Uuid) -> UploadResult<FinishedUpload> {
        let _guard = lock.write().await;
        let session = self.staging.load_session(id).await?;

        if let Some(index) = self.staging.first_missing_chunk(&session).await? {
            return Err(UploadError::MissingChunk {
                upload_id: id,
                index,
            });
        }

        let assembled = self.assemble(&session).await?;
        let finished = FinishedUpload {
            id: Uuid::new_v4(),
            filename: session.filename.clone(),
            size_bytes: i64::try_from(assembled.size_bytes).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "assembled file too large")
            })?,
            path: assembled.path.to_string_lossy().into_owned(),
            mime_type: session.mime_type.clone(),
            etag: assembled.etag,
            created_at: Utc::now(),
        };

        if let Err(err) = self.records.persist_finished_upload(&finished).await {
            // Keep the staging area so the client can retry.
            if let Err(rm_err) = fs::remove_file(&assembled.path).await {
                warn!(
                    "failed to remove unrecorded output {}: {}",
                    assembled.path.display(),
                    rm_err
                );
            }
            return Err(UploadError::Record(err));
        }

        self.staging.reclaim(id).await;

        info!(
            upload_id = %id,
            file_id = %finished.id,
            size_bytes = finished.size_bytes,
            path = %finished.path,
            "upload completed"
        );
        Ok(finished)
    }

    /// Delete staging namespaces initiated more than `max_age` ago.
    ///
    /// Each session is reclaimed under its exclusive lock so a concurrent
    /// `complete` either finishes first or finds the session gone.
    pub async fn reap_stale(&self, max_age: Duration) -> UploadResult<Vec<Uuid>> {
        let stale = self.staging.stale_sessions(max_age).await?;
        let mut reaped = Vec::with_capacity(stale.len());
        for id in stale {
            let lock = self.session_lock(id);
            {
                let _guard = lock.write().await;
                if self.staging.session_exists(id).await {
                    self.staging.reclaim(id).await;
                    reaped.push(id);
                }
            }
            self.release_lock(id, lock);
        }
        if !reaped.is_empty() {
            info!(count = reaped.len(), "reaped abandoned upload sessions");
        }
        Ok(reaped)
    }

    /// Run `reap_stale` every `max_age` until the runtime shuts down.
    pub fn spawn_reaper(&self, max_age: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(max_age.max(MIN_REAP_PERIOD));
            loop {
                ticker.tick().await;
                if let Err(err) = service.reap_stale(max_age).await {
                    warn!("upload reaper pass failed: {}", err);
                }
            }
        })
    }

    /// Concatenate all chunks in index order into a temp file beside the
    /// final destination, then rename it into place.
    async fn assemble(&self, session: &UploadSession) -> UploadResult<AssembledFile> {
        let files_dir = self.staging.files_dir();
        fs::create_dir_all(&files_dir).await?;

        let final_path = files_dir.join(output_name(&session.filename, Utc::now()));
        let tmp_path = files_dir.join(format!(".assemble-{}.part", Uuid::new_v4()));

        let (size_bytes, etag) = match self.write_assembly(session, &tmp_path).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::Io(err));
        }

        Ok(AssembledFile {
            path: final_path,
            size_bytes,
            etag,
        })
    }

    async fn write_assembly(
        &self,
        session: &UploadSession,
        tmp_path: &Path,
    ) -> UploadResult<(u64, String)> {
        let mut out = File::create(tmp_path).await?;
        let mut digest = Context::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut size_bytes: u64 = 0;

        for index in 0..session.total_chunks {
            let mut chunk = self.staging.open_chunk(session, index).await?;
            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.consume(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                size_bytes += n as u64;
            }
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    fn session_lock(&self, id: Uuid) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Drop this call's handle on the session lock, removing the map entry
    /// when nobody else holds or waits on it. Handles are only cloned under
    /// the map mutex, so the count cannot grow while it is checked.
    fn release_lock(&self, id: Uuid, lock: Arc<RwLock<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
        let idle = locks
            .get(&id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poison| poison.into_inner()).len()
    }
}

struct AssembledFile {
    path: PathBuf,
    size_bytes: u64,
    etag: String,
}

/// Parse a client supplied upload id. Anything that is not a UUID cannot
/// name a session, which also keeps it out of filesystem paths.
pub fn parse_upload_id(raw: &str) -> UploadResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| UploadError::InvalidSession(raw.to_string()))
}

/// Final on-disk name: sortable timestamp, a short random token, then the
/// sanitized client filename.
pub fn output_name(filename: &str, now: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        now.format("%Y%m%d_%H%M%S"),
        &token[..8],
        sanitize_filename(filename)
    )
}

/// Reduce an untrusted filename to a single safe path component.
///
/// Directory components are dropped, control characters and characters that
/// are reserved on common filesystems are removed, and the result is capped
/// at `MAX_FILENAME_LEN` bytes.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let mut cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    cleaned = cleaned.trim().trim_start_matches('.').to_string();

    if cleaned.len() > MAX_FILENAME_LEN {
        let mut cut = MAX_FILENAME_LEN;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned.truncate(cut);
    }

    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::record_store::RecordResult;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use futures::stream;

    struct AcceptAll;

    #[async_trait]
    impl RecordStore for AcceptAll {
        async fn persist_finished_upload(&self, upload: &FinishedUpload) -> RecordResult<Uuid> {
            Ok(upload.id)
        }
    }

    fn chunk(data: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn session_locks_do_not_outlive_their_calls() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        staging.prepare().await.unwrap();
        let service = UploadService::new(staging, Arc::new(AcceptAll));

        // Sessions that are filled but never completed.
        for _ in 0..16 {
            let session = service
                .initiate(InitiateUpload {
                    filename: "abandoned.bin".into(),
                    total_chunks: 2,
                    mime_type: "application/octet-stream".into(),
                    declared_size: 2,
                })
                .await
                .unwrap();
            let id = session.id.to_string();
            service.put_chunk(&id, 0, chunk(b"a")).await.unwrap();
            assert!(service.put_chunk(&id, 5, chunk(b"x")).await.is_err());
            assert!(matches!(
                service.complete(&id).await,
                Err(UploadError::MissingChunk { index: 1, .. })
            ));
        }
        assert_eq!(service.tracked_locks(), 0);

        // An entry survives while a second caller still holds a handle.
        let id = Uuid::new_v4();
        let held = service.session_lock(id);
        let waiter = service.session_lock(id);
        service.release_lock(id, held);
        assert_eq!(service.tracked_locks(), 1);
        service.release_lock(id, waiter);
        assert_eq!(service.tracked_locks(), 0);
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\cv.pdf"), "cv.pdf");
        assert_eq!(sanitize_filename("docs/report.pdf"), "report.pdf");
    }

    #[test]
    fn sanitize_drops_control_and_reserved_chars() {
        assert_eq!(sanitize_filename("a\nb\0c.txt"), "abc.txt");
        assert_eq!(sanitize_filename("what?<is>|this*.png"), "whatisthis.png");
    }

    #[test]
    fn sanitize_falls_back_for_empty_names() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn sanitize_caps_length_on_char_boundary() {
        let long = "é".repeat(150);
        let cleaned = sanitize_filename(&long);
        assert!(cleaned.len() <= MAX_FILENAME_LEN);
        assert!(cleaned.chars().all(|c| c == 'é'));
    }

    #[test]
    fn output_name_is_prefixed_and_sortable() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let name = output_name("my cv.pdf", now);
        assert!(name.starts_with("20240309_140507_"));
        assert!(name.ends_with("_my cv.pdf"));
        assert_eq!(name.len(), "20240309_140507_".len() + 8 + "_my cv.pdf".len());
    }

    #[test]
    fn output_names_do_not_collide() {
        let now = Utc::now();
        assert_ne!(output_name("a.txt", now), output_name("a.txt", now));
    }

    #[test]
    fn upload_id_must_be_uuid() {
        assert!(matches!(
            parse_upload_id("../../tmp"),
            Err(UploadError::InvalidSession(_))
        ));
        let id = Uuid::new_v4();
        assert_eq!(parse_upload_id(&id.to_string()).unwrap(), id);
    }
}
