use std::sync::Arc;
use axum::{extract::DefaultBodyLimit, middleware, routing::{delete, get, post, put}, Router};
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

/// Headroom for the JSON envelope and a `data:` URL prefix.
const UPLOAD_ENVELOPE_BYTES: usize = 64 * 1024;

pub fn encounter_routes(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(open_encounter))
        .route("/{encounter_id}", get(get_encounter))
        .route("/{encounter_id}/draft", put(autosave_draft))
        .route("/{encounter_id}/finalize", post(finalize_encounter))
        .route(
            "/{encounter_id}/attachments",
            post(upload_attachment)
                .get(list_attachments)
                .layer(DefaultBodyLimit::max(upload_body_limit(config.max_upload_bytes))),
        )
        .route("/patients/{patient_id}", get(list_patient_encounters))
        .route("/attachments/{attachment_id}/url", get(attachment_url))
        .route("/attachments/{attachment_id}", delete(delete_attachment))
        .layer(middleware::from_fn_with_state(config.clone(), auth_middleware))
        .with_state(config)
}

/// Request size that still fits a base64-encoded file of `max_upload_bytes`.
pub fn upload_body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes.div_ceil(3) * 4 + UPLOAD_ENVELOPE_BYTES
}
