use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn professional_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::create_professional).get(handlers::list_professionals))
        .route("/{professional_id}", get(handlers::get_professional).put(handlers::update_professional))
        .route("/{professional_id}/deactivate", post(handlers::deactivate_professional))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
