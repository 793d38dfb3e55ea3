//! Consulting requests submitted through the contact form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored consult request.
///
/// `attachment_id` optionally points at a finished upload (`file_id`) the
/// client sent beforehand; it is not checked for existence.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ConsultRequest {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub company: Option<String>,
    pub role: Option<String>,
    pub summary: String,
    pub start_date: Option<String>,
    pub budget: Option<String>,
    pub attachment_id: Option<String>,
}

/// Body of `POST /api/consult-requests`.
#[derive(Deserialize, Debug)]
pub struct NewConsultRequest {
    pub name: String,
    pub company: Option<String>,
    pub role: Option<String>,
    pub summary: String,
    pub start_date: Option<String>,
    pub budget: Option<String>,
    pub attachment_id: Option<String>,
}

impl NewConsultRequest {
    pub fn into_record(self) -> ConsultRequest {
        ConsultRequest {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            name: self.name,
            company: self.company,
            role: self.role,
            summary: self.summary,
            start_date: self.start_date,
            budget: self.budget,
            attachment_id: self.attachment_id,
        }
    }
}
