use crate::state::AppState;
use axum::{Json, extract::State, response::Redirect};
use serde_json::{Value, json};

/// `GET /api/`
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello World" }))
}

/// `GET /api/cv` — 307 to the externally hosted CV.
pub async fn cv_redirect(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.cv_url)
}
