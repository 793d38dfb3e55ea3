//! Portfolio backend: chunked file uploads plus a few small record
//! endpoints, served over axum with SQLite for metadata.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
