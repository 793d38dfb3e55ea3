//! Core data models for the folio backend.
//!
//! Upload sessions live on disk next to their chunks; finished uploads,
//! status checks and consult requests map to SQLite tables via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod consult;
pub mod status;
pub mod upload;
