//! src/services/staging.rs
//!
//! StagingArea — on-disk layout for chunked uploads, rooted at an injected
//! directory:
//!
//! ```text
//! {root}/
//!   tmp/{upload_id}/meta.json        session metadata
//!   tmp/{upload_id}/chunk_000000     one file per received chunk index
//!   files/{timestamp}_{token}_{name} assembled uploads
//! ```
//!
//! Every write lands in a temp file first and is renamed into place, so a
//! reader never observes a half-written chunk or metadata file.

use crate::{
    models::upload::UploadSession,
    services::upload_service::{UploadError, UploadResult},
};
use bytes::Bytes;
use futures::{Stream, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use uuid::Uuid;

const STAGING_DIR: &str = "tmp";
const FILES_DIR: &str = "files";
const META_FILE: &str = "meta.json";

#[derive(Clone, Debug)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the staging and output directories if missing.
    pub async fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(self.root.join(STAGING_DIR)).await?;
        fs::create_dir_all(self.files_dir()).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn session_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(STAGING_DIR).join(id.to_string())
    }

    /// Zero-padded so chunk files sort lexically in index order.
    pub fn chunk_path(&self, id: Uuid, index: u32) -> PathBuf {
        self.session_dir(id).join(chunk_file_name(index))
    }

    fn meta_path(&self, id: Uuid) -> PathBuf {
        self.session_dir(id).join(META_FILE)
    }

    /// Create the session namespace and durably record its metadata.
    pub async fn create_session(&self, session: &UploadSession) -> UploadResult<()> {
        let dir = self.session_dir(session.id);
        fs::create_dir_all(&dir).await?;

        let encoded = serde_json::to_vec_pretty(session).map_err(io::Error::from)?;
        let tmp_path = dir.join(format!(".{}.{}", META_FILE, Uuid::new_v4()));
        if let Err(err) = write_synced(&tmp_path, &encoded).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, self.meta_path(session.id)).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::Io(err));
        }
        Ok(())
    }

    /// Read a session's metadata. A missing namespace is `InvalidSession`.
    pub async fn load_session(&self, id: Uuid) -> UploadResult<UploadSession> {
        let raw = match fs::read(self.meta_path(id)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(UploadError::InvalidSession(id.to_string()));
            }
            Err(err) => return Err(UploadError::Io(err)),
        };
        serde_json::from_slice(&raw).map_err(|source| UploadError::CorruptSession {
            upload_id: id,
            source,
        })
    }

    pub async fn session_exists(&self, id: Uuid) -> bool {
        fs::try_exists(self.meta_path(id)).await.unwrap_or(false)
    }

    /// Stream a chunk body into the session namespace, replacing any previous
    /// write of the same index. Returns the number of bytes stored.
    ///
    /// Memory use is bounded by the size of the items yielded by `stream`.
    pub async fn write_chunk<S>(
        &self,
        session: &UploadSession,
        index: u32,
        stream: S,
    ) -> UploadResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let dir = self.session_dir(session.id);
        let tmp_path = dir.join(format!(".{}.{}", chunk_file_name(index), Uuid::new_v4()));

        let mut file = match File::create(&tmp_path).await {
            Ok(file) => file,
            // The namespace was reclaimed underneath us.
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(UploadError::InvalidSession(session.id.to_string()));
            }
            Err(err) => return Err(UploadError::Io(err)),
        };

        let reader = StreamReader::new(stream);
        pin_mut!(reader);
        let written = async {
            let n = tokio::io::copy_buf(&mut reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, io::Error>(n)
        }
        .await;
        drop(file);

        let size_bytes = match written {
            Ok(n) => n,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(UploadError::from_chunk_io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, self.chunk_path(session.id, index)).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::Io(err));
        }
        Ok(size_bytes)
    }

    /// Lowest index in `[0, total_chunks)` with no stored chunk, if any.
    pub async fn first_missing_chunk(&self, session: &UploadSession) -> UploadResult<Option<u32>> {
        for index in 0..session.total_chunks {
            match fs::metadata(self.chunk_path(session.id, index)).await {
                Ok(meta) if meta.is_file() => continue,
                Ok(_) => return Ok(Some(index)),
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Some(index)),
                Err(err) => return Err(UploadError::Io(err)),
            }
        }
        Ok(None)
    }

    pub async fn open_chunk(&self, session: &UploadSession, index: u32) -> UploadResult<File> {
        File::open(self.chunk_path(session.id, index))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    UploadError::MissingChunk {
                        upload_id: session.id,
                        index,
                    }
                } else {
                    UploadError::Io(err)
                }
            })
    }

    /// Best-effort removal of a session namespace: every file inside it,
    /// then the directory itself. Failures are logged, never returned.
    pub async fn reclaim(&self, id: Uuid) {
        let dir = self.session_dir(id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("staging dir {} already gone", dir.display());
                return;
            }
            Err(err) => {
                warn!("failed to list staging dir {}: {}", dir.display(), err);
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!("failed to read staging dir {}: {}", dir.display(), err);
                    break;
                }
            };
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("failed to remove staged file {}: {}", path.display(), err),
            }
        }

        match fs::remove_dir(&dir).await {
            Ok(()) => debug!("removed staging dir {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove staging dir {}: {}", dir.display(), err),
        }
    }

    /// Sessions whose initiation is older than `max_age`.
    ///
    /// Age comes from the recorded `created_at`; when the metadata cannot be
    /// read the directory's modification time is used instead.
    pub async fn stale_sessions(&self, max_age: Duration) -> UploadResult<Vec<Uuid>> {
        let staging_root = self.root.join(STAGING_DIR);
        let mut entries = match fs::read_dir(&staging_root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(UploadError::Io(err)),
        };

        let now = SystemTime::now();
        let mut stale = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };

            let started = match self.load_session(id).await {
                Ok(session) => SystemTime::from(session.created_at),
                Err(_) => match entry.metadata().await.and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(_) => continue,
                },
            };
            let age = now.duration_since(started).unwrap_or_default();
            if age >= max_age {
                stale.push(id);
            }
        }
        Ok(stale)
    }
}

pub fn chunk_file_name(index: u32) -> String {
    format!("chunk_{:06}", index)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}
