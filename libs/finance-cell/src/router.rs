use std::sync::Arc;
use axum::{middleware, routing::{get, post}, Router};
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

pub fn finance_routes(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/transactions", post(create_transaction).get(list_transactions))
        .route("/transactions/{transaction_id}", get(get_transaction).put(update_transaction))
        .route("/transactions/{transaction_id}/pay", post(pay_transaction))
        .route("/transactions/{transaction_id}/cancel", post(cancel_transaction))
        .route("/entries", get(list_entries))
        .route("/entries/{entry_id}", get(get_entry))
        .route("/entries/{entry_id}/settle", post(settle_entry))
        .route("/summary", get(get_summary))
        .layer(middleware::from_fn_with_state(config.clone(), auth_middleware))
        .with_state(config)
}
