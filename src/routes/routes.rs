//! Route table for the folio backend.
//!
//! ## Structure
//! - **Uploads** (`/api/uploads`)
//!   - `POST /initiate` — start a chunked upload session
//!   - `POST /chunk` — multipart chunk (`upload_id`, `index`, `chunk`)
//!   - `PUT  /{upload_id}/chunks/{index}` — raw-body chunk
//!   - `POST /complete` — assemble and record the finished file
//!
//! - **Records**
//!   - `GET|POST /api/status`
//!   - `GET|POST /api/consult-requests`
//!
//! - **Misc**: `GET /api/`, `GET /api/cv`, `GET /healthz`, `GET /readyz`

use crate::{
    config::AppConfig,
    handlers::{
        health_handlers::{healthz, readyz},
        record_handlers::{
            create_consult_request, create_status_check, list_consult_requests,
            list_status_checks,
        },
        site_handlers::{cv_redirect, root},
        upload_handlers::{complete_upload, initiate_upload, put_chunk, upload_chunk},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post, put},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Build the router for all API routes, without middleware.
pub fn routes() -> Router<AppState> {
    let api = Router::new()
        .route("/status", get(list_status_checks).post(create_status_check))
        .route(
            "/consult-requests",
            get(list_consult_requests).post(create_consult_request),
        )
        .route("/cv", get(cv_redirect))
        .route("/uploads/initiate", post(initiate_upload))
        .route("/uploads/chunk", post(upload_chunk))
        .route("/uploads/{upload_id}/chunks/{index}", put(put_chunk))
        .route("/uploads/complete", post(complete_upload));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api", get(root))
        .route("/api/", get(root))
        .nest("/api", api)
}

/// Full application: routes, state, body limit, CORS and request tracing.
pub fn app(state: AppState, cfg: &AppConfig) -> Router {
    routes()
        .with_state(state)
        .layer(DefaultBodyLimit::max(cfg.max_body_bytes))
        .layer(cors_layer(&cfg.cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// Any origin when none are configured, otherwise the configured list.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!("ignoring invalid CORS origin `{}`: {}", origin, err);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
