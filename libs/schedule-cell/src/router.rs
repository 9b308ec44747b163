use std::sync::Arc;
use axum::{middleware, routing::{get, post}, Extension, Router};
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;
use crate::services::events::SlotEventHub;

pub fn schedule_routes(config: Arc<AppConfig>, events: SlotEventHub) -> Router {
    let protected = Router::new()
        .route("/journeys", post(create_journey).get(list_journeys))
        .route("/journeys/{journey_id}", get(get_journey))
        .route("/journeys/{journey_id}/cancel", post(cancel_journey))
        .route("/slots", get(list_slots))
        .route("/slots/{slot_id}", get(get_slot))
        .route("/slots/{slot_id}/book", post(book_slot))
        .route("/slots/{slot_id}/release", post(release_slot))
        .route("/slots/{slot_id}/start", post(start_slot))
        .route("/slots/{slot_id}/finish", post(finish_slot))
        .route("/slots/{slot_id}/cancel", post(cancel_slot))
        .route("/slots/{slot_id}/no-show", post(mark_no_show))
        .route("/slots/{slot_id}/block", post(block_slot))
        .route("/slots/{slot_id}/financial-entry", post(retry_financial_entry))
        .route("/patients/{patient_id}/history", get(patient_history))
        .route_layer(middleware::from_fn_with_state(config.clone(), auth_middleware));

    // The event stream authenticates through its query string.
    let realtime = Router::new().route("/events", get(schedule_events));

    protected
        .merge(realtime)
        .layer(Extension(events))
        .with_state(config)
}
