//! src/services/record_store.rs
//!
//! Durable metadata in SQLite: finished uploads, status checks and consult
//! requests. The upload core only sees the `RecordStore` trait and only ever
//! appends to it.

use crate::models::{
    consult::{ConsultRequest, NewConsultRequest},
    status::StatusCheck,
    upload::FinishedUpload,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const LIST_LIMIT: i64 = 1000;
const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Where completed uploads are reported. Called once per finished upload,
/// never queried by the upload core.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn persist_finished_upload(&self, upload: &FinishedUpload) -> RecordResult<Uuid>;
}

#[derive(Clone)]
pub struct SqliteRecordStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> RecordResult<()> {
        let statements = INIT_MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// `SELECT 1`, for readiness probes.
    pub async fn ping(&self) -> RecordResult<i64> {
        let v = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(v)
    }

    pub async fn create_status_check(&self, client_name: String) -> RecordResult<StatusCheck> {
        let check = StatusCheck {
            id: Uuid::new_v4(),
            client_name,
            timestamp: Utc::now(),
        };
        sqlx::query("INSERT INTO status_checks (id, client_name, timestamp) VALUES (?, ?, ?)")
            .bind(check.id)
            .bind(&check.client_name)
            .bind(check.timestamp)
            .execute(&*self.db)
            .await?;
        Ok(check)
    }

    pub async fn list_status_checks(&self) -> RecordResult<Vec<StatusCheck>> {
        let rows = sqlx::query_as::<_, StatusCheck>(
            "SELECT id, client_name, timestamp FROM status_checks LIMIT ?",
        )
        .bind(LIST_LIMIT)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    pub async fn create_consult_request(
        &self,
        req: NewConsultRequest,
    ) -> RecordResult<ConsultRequest> {
        let record = req.into_record();
        sqlx::query(
            "INSERT INTO consult_requests (
                id, created_at, name, company, role, summary, start_date, budget, attachment_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.created_at)
        .bind(&record.name)
        .bind(&record.company)
        .bind(&record.role)
        .bind(&record.summary)
        .bind(&record.start_date)
        .bind(&record.budget)
        .bind(&record.attachment_id)
        .execute(&*self.db)
        .await?;
        Ok(record)
    }

    /// Newest first.
    pub async fn list_consult_requests(&self) -> RecordResult<Vec<ConsultRequest>> {
        let rows = sqlx::query_as::<_, ConsultRequest>(
            "SELECT id, created_at, name, company, role, summary, start_date, budget, attachment_id
             FROM consult_requests
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(LIST_LIMIT)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn persist_finished_upload(&self, upload: &FinishedUpload) -> RecordResult<Uuid> {
        sqlx::query(
            "INSERT INTO uploads (id, filename, size_bytes, path, mime_type, etag, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(upload.id)
        .bind(&upload.filename)
        .bind(upload.size_bytes)
        .bind(&upload.path)
        .bind(&upload.mime_type)
        .bind(&upload.etag)
        .bind(upload.created_at)
        .execute(&*self.db)
        .await?;
        Ok(upload.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteRecordStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteRecordStore::new(Arc::new(pool));
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn migrate_twice_is_harmless() {
        let store = store().await;
        store.migrate().await.unwrap();
        assert_eq!(store.ping().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn persisted_upload_is_readable() {
        let store = store().await;
        let upload = FinishedUpload {
            id: Uuid::new_v4(),
            filename: "cv.pdf".into(),
            size_bytes: 2048,
            path: "/data/files/20240101_000000_abcd1234_cv.pdf".into(),
            mime_type: "application/pdf".into(),
            etag: "d41d8cd98f00b204e9800998ecf8427e".into(),
            created_at: Utc::now(),
        };
        let id = store.persist_finished_upload(&upload).await.unwrap();
        assert_eq!(id, upload.id);

        let row = sqlx::query_as::<_, FinishedUpload>(
            "SELECT id, filename, size_bytes, path, mime_type, etag, created_at
             FROM uploads WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*store.db)
        .await
        .unwrap();
        assert_eq!(row.filename, "cv.pdf");
        assert_eq!(row.size_bytes, 2048);
    }

    #[tokio::test]
    async fn consult_requests_list_newest_first() {
        let store = store().await;
        for name in ["first", "second"] {
            store
                .create_consult_request(NewConsultRequest {
                    name: name.into(),
                    company: None,
                    role: None,
                    summary: "help".into(),
                    start_date: None,
                    budget: None,
                    attachment_id: None,
                })
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let listed = store.list_consult_requests().await.unwrap();
        let names: Vec<_> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["second", "first"]);
    }
}
