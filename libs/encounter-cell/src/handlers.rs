use std::sync::Arc;
use axum::{
    extract::{Path, State, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AutosaveRequest, EncounterError, FinalizeRequest, OpenEncounterRequest, UploadAttachmentRequest,
};
use crate::services::attachment::AttachmentService;
use crate::services::encounter::{ensure_clinical_reader, EncounterService};

/// Version conflicts carry the current version so the editor can reload.
fn version_aware(error: EncounterError) -> Response {
    if let EncounterError::VersionConflict { current_version } = &error {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "error": error.to_string(),
                "current_version": current_version
            })),
        ).into_response();
    }
    AppError::from(error).into_response()
}

#[axum::debug_handler]
pub async fn open_encounter(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<OpenEncounterRequest>,
) -> Result<Json<Value>, AppError> {
    let service = EncounterService::new(&config);
    let encounter = service.open_encounter(request.slot_id, &user, auth.token()).await?;

    Ok(Json(json!(encounter)))
}

#[axum::debug_handler]
pub async fn get_encounter(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(encounter_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_clinical_reader(&user)?;

    let service = EncounterService::new(&config);
    let encounter = service.get_encounter(encounter_id, auth.token()).await?;

    Ok(Json(json!(encounter)))
}

#[axum::debug_handler]
pub async fn autosave_draft(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(encounter_id): Path<Uuid>,
    Json(request): Json<AutosaveRequest>,
) -> Response {
    let service = EncounterService::new(&config);
    match service
        .autosave_draft(encounter_id, request.note, request.expected_version, &user, auth.token())
        .await
    {
        Ok(encounter) => Json(json!(encounter)).into_response(),
        Err(e) => version_aware(e),
    }
}

#[axum::debug_handler]
pub async fn finalize_encounter(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(encounter_id): Path<Uuid>,
    Json(request): Json<FinalizeRequest>,
) -> Response {
    let service = EncounterService::new(&config);
    match service
        .finalize_encounter(encounter_id, request.expected_version, &user, auth.token())
        .await
    {
        Ok(encounter) => Json(json!(encounter)).into_response(),
        Err(e) => version_aware(e),
    }
}

#[axum::debug_handler]
pub async fn list_patient_encounters(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_clinical_reader(&user)?;

    let service = EncounterService::new(&config);
    let encounters = service.list_patient_encounters(patient_id, auth.token()).await?;

    Ok(Json(json!({
        "patient_id": patient_id,
        "encounters": encounters,
        "total": encounters.len()
    })))
}

// ==============================================================================
// ATTACHMENTS
// ==============================================================================

#[axum::debug_handler]
pub async fn upload_attachment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(encounter_id): Path<Uuid>,
    Json(request): Json<UploadAttachmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let service = AttachmentService::new(&config);
    let attachment = service.upload_attachment(encounter_id, request, &user, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(json!(attachment))))
}

#[axum::debug_handler]
pub async fn list_attachments(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(encounter_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_clinical_reader(&user)?;

    let service = AttachmentService::new(&config);
    let attachments = service.list_attachments(encounter_id, auth.token()).await?;

    Ok(Json(json!({
        "attachments": attachments,
        "total": attachments.len()
    })))
}

#[axum::debug_handler]
pub async fn attachment_url(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(attachment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_clinical_reader(&user)?;

    let service = AttachmentService::new(&config);
    let signed = service.attachment_url(attachment_id, auth.token()).await?;

    Ok(Json(json!(signed)))
}

#[axum::debug_handler]
pub async fn delete_attachment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(attachment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AttachmentService::new(&config);
    service.delete_attachment(attachment_id, &user, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "attachment_id": attachment_id
    })))
}
