//! Status check pings recorded by clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StatusCheck {
    pub id: Uuid,
    pub client_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /api/status`.
#[derive(Deserialize, Debug)]
pub struct NewStatusCheck {
    pub client_name: String,
}
