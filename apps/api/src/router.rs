use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use encounter_cell::encounter_routes;
use finance_cell::finance_routes;
use patient_cell::router::patient_routes;
use professional_cell::router::professional_routes;
use schedule_cell::{schedule_routes, SlotEventHub};
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>, events: SlotEventHub) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic API is running!" }))
        .nest("/professionals", professional_routes(state.clone()))
        .nest("/patients", patient_routes(state.clone()))
        .nest("/schedule", schedule_routes(state.clone(), events))
        .nest("/finance", finance_routes(state.clone()))
        .nest("/encounters", encounter_routes(state))
}
