pub mod record_store;
pub mod staging;
pub mod upload_service;
