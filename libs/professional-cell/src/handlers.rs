use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_staff;

use crate::models::{CreateProfessionalRequest, UpdateProfessionalRequest, ProfessionalSearchQuery};
use crate::services::ProfessionalService;

#[axum::debug_handler]
pub async fn create_professional(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateProfessionalRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = ProfessionalService::new(&config);
    let professional = service.create_professional(request, auth.token()).await?;

    Ok(Json(json!(professional)))
}

#[axum::debug_handler]
pub async fn get_professional(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = ProfessionalService::new(&config);
    let professional = service.get_professional(professional_id, auth.token()).await?;

    Ok(Json(json!(professional)))
}

#[axum::debug_handler]
pub async fn list_professionals(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<ProfessionalSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let service = ProfessionalService::new(&config);
    let professionals = service.list_professionals(query, auth.token()).await?;

    Ok(Json(json!({
        "professionals": professionals,
        "total": professionals.len()
    })))
}

#[axum::debug_handler]
pub async fn update_professional(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(professional_id): Path<Uuid>,
    Json(request): Json<UpdateProfessionalRequest>,
) -> Result<Json<Value>, AppError> {
    // Professionals may edit their own contact data, but not money terms.
    let is_self = user.id == professional_id.to_string();
    let touches_money = request.default_price.is_some() || request.commission_percentage.is_some();
    if !user.is_staff() && (!is_self || touches_money) {
        return Err(AppError::Forbidden("Not allowed to update this professional".to_string()));
    }

    let service = ProfessionalService::new(&config);
    let professional = service.update_professional(professional_id, request, auth.token()).await?;

    Ok(Json(json!(professional)))
}

#[axum::debug_handler]
pub async fn deactivate_professional(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = ProfessionalService::new(&config);
    let professional = service.deactivate_professional(professional_id, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "professional": professional
    })))
}
