use std::sync::Arc;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Extension, Path, Query, State,
    },
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_staff;
use shared_utils::jwt::validate_token;

use crate::models::{BookSlotRequest, CancelSlotRequest, CreateJourneyRequest, JourneyQuery, SlotQuery};
use crate::services::events::{stream_events, SlotEventHub};
use crate::services::journey::JourneyService;
use crate::services::slot::SlotService;

#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    pub access_token: Option<String>,
    pub professional_id: Option<Uuid>,
}

/// Staff may act for anyone; a professional only for themselves.
fn ensure_self_or_staff(user: &User, professional_id: Uuid) -> Result<(), AppError> {
    if user.is_staff() || (user.is_professional() && user.id == professional_id.to_string()) {
        return Ok(());
    }
    Err(AppError::Forbidden("You can only manage your own agenda".to_string()))
}

fn own_professional_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::Auth("Invalid user id in token".to_string()))
}

// ==============================================================================
// JOURNEYS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_journey(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Json(request): Json<CreateJourneyRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_staff(&user, request.professional_id)?;

    let service = JourneyService::new(&config, events);
    let journey = service.create_journey(request, auth.token()).await?;

    Ok(Json(json!(journey)))
}

#[axum::debug_handler]
pub async fn list_journeys(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(events): Extension<SlotEventHub>,
    Query(query): Query<JourneyQuery>,
) -> Result<Json<Value>, AppError> {
    let service = JourneyService::new(&config, events);
    let journeys = service.list_journeys(query, auth.token()).await?;

    Ok(Json(json!({
        "journeys": journeys,
        "total": journeys.len()
    })))
}

#[axum::debug_handler]
pub async fn get_journey(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(events): Extension<SlotEventHub>,
    Path(journey_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = JourneyService::new(&config, events);
    let journey = service.get_journey(journey_id, auth.token()).await?;

    Ok(Json(json!(journey)))
}

#[axum::debug_handler]
pub async fn cancel_journey(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(journey_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = JourneyService::new(&config, events);
    let current = service.get_journey(journey_id, auth.token()).await?;
    ensure_self_or_staff(&user, current.journey.professional_id)?;

    let cancellation = service.cancel_journey(journey_id, &user, auth.token()).await?;

    Ok(Json(json!(cancellation)))
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_slots(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Query(mut query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() {
        query.professional_id = Some(own_professional_id(&user)?);
    }

    let service = SlotService::new(&config, events);
    let slots = service.list_slots(query, auth.token()).await?;

    Ok(Json(json!({
        "slots": slots,
        "total": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn get_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&config, events);
    let slot = service.get_slot(slot_id, auth.token()).await?;
    ensure_self_or_staff(&user, slot.professional_id)?;

    Ok(Json(json!(slot)))
}

#[axum::debug_handler]
pub async fn book_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<BookSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&config, events);
    let outcome = service.book_slot(slot_id, request, &user, auth.token()).await?;

    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn release_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&config, events);
    let outcome = service.release_slot(slot_id, &user, auth.token()).await?;

    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn start_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&config, events);
    let outcome = service.start_slot(slot_id, &user, auth.token()).await?;

    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn finish_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&config, events);
    let outcome = service.finish_slot(slot_id, &user, auth.token()).await?;

    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn cancel_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<CancelSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&config, events);
    let outcome = service.cancel_slot(slot_id, request.reason, &user, auth.token()).await?;

    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&config, events);
    let outcome = service.mark_no_show(slot_id, &user, auth.token()).await?;

    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn block_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<CancelSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&config, events);
    let outcome = service.block_slot(slot_id, request.reason, &user, auth.token()).await?;

    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn retry_financial_entry(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = SlotService::new(&config, events);
    let entry = service.retry_financial_entry(slot_id, auth.token()).await?;

    Ok(Json(json!({
        "slot_id": slot_id,
        "financial_entry": entry
    })))
}

#[axum::debug_handler]
pub async fn patient_history(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(events): Extension<SlotEventHub>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    // Front desk sees the whole attendance record; professionals their own part of it.
    let scope = if user.is_staff() {
        None
    } else if user.is_professional() {
        Some(own_professional_id(&user)?)
    } else {
        return Err(AppError::Forbidden("Appointment history is restricted to clinic staff".to_string()));
    };

    let service = SlotService::new(&config, events);
    let history = service.patient_history(patient_id, scope, auth.token()).await?;

    Ok(Json(json!({
        "patient_id": patient_id,
        "history": history,
        "total": history.len()
    })))
}

// ==============================================================================
// REALTIME
// ==============================================================================

/// Browsers cannot set headers on a WebSocket handshake, so the token
/// travels in the query string.
pub async fn schedule_events(
    State(config): State<Arc<AppConfig>>,
    Extension(events): Extension<SlotEventHub>,
    Query(query): Query<EventStreamQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let token = query
        .access_token
        .ok_or_else(|| AppError::Auth("Missing access_token".to_string()))?;
    let user = validate_token(&token, &config.supabase_jwt_secret).map_err(AppError::Auth)?;

    let professional_id = if user.is_staff() {
        query.professional_id
    } else {
        let own_id = own_professional_id(&user)?;
        if query.professional_id.is_some_and(|id| id != own_id) {
            return Err(AppError::Forbidden("You can only follow your own agenda".to_string()));
        }
        Some(own_id)
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!("Schedule event stream rejected: {}", rejection);
            return Ok(rejection.into_response());
        }
    };

    let receiver = events.subscribe();
    Ok(ws.on_upgrade(move |socket| stream_events(socket, receiver, professional_id, user.id)))
}
