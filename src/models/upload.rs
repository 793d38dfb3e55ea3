//! Chunked upload session and the finished file it produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for an in-flight chunked upload.
///
/// Persisted as `meta.json` inside the session's staging directory so that a
/// restart between chunk uploads does not lose the session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    /// Opaque identifier handed back to the client as `upload_id`.
    pub id: Uuid,

    /// Client-declared original filename. Untrusted; only used for naming.
    pub filename: String,

    /// Number of chunks the client promised to send (always > 0).
    pub total_chunks: u32,

    /// Client-declared MIME type.
    pub mime_type: String,

    /// Client-declared size in bytes. Advisory only.
    pub declared_size: u64,

    /// When the session was initiated.
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Whether `index` addresses a chunk of this session.
    pub fn contains_index(&self, index: u32) -> bool {
        index < self.total_chunks
    }
}

/// The immutable result of assembling every chunk of a session.
///
/// This is the only artifact handed to the record store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FinishedUpload {
    /// Generated identifier, returned to the client as `file_id`.
    pub id: Uuid,

    /// Original (unsanitized) filename as declared by the client.
    pub filename: String,

    /// Actual number of bytes written during assembly.
    pub size_bytes: i64,

    /// Location of the assembled file on disk.
    pub path: String,

    /// MIME type declared at initiate time.
    pub mime_type: String,

    /// MD5 of the assembled bytes.
    pub etag: String,

    pub created_at: DateTime<Utc>,
}
