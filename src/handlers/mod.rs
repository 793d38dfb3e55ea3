pub mod health_handlers;
pub mod record_handlers;
pub mod site_handlers;
pub mod upload_handlers;
