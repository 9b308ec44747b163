use std::sync::Arc;
use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_staff;

use crate::models::{
    CreateTransactionRequest, EntryQuery, MarkPaidRequest, PaymentMethod, SummaryQuery,
    TransactionQuery, UpdateTransactionRequest,
};
use crate::services::entry::FinancialEntryService;
use crate::services::summary::SummaryService;
use crate::services::transaction::TransactionService;

#[derive(Debug, Deserialize)]
pub struct SettleEntryRequest {
    pub payment_method: PaymentMethod,
}

/// Staff see everything; a professional is pinned to their own records.
fn scope_to_user(user: &User, requested: Option<Uuid>) -> Result<Option<Uuid>, AppError> {
    if user.is_staff() {
        return Ok(requested);
    }
    if !user.is_professional() {
        return Err(AppError::Forbidden("Insufficient permissions".to_string()));
    }

    let own_id = Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Invalid user id in token".to_string()))?;
    match requested {
        Some(id) if id != own_id => Err(AppError::Forbidden(
            "Professionals can only view their own financial records".to_string(),
        )),
        _ => Ok(Some(own_id)),
    }
}

// ==============================================================================
// TRANSACTIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_transaction(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = TransactionService::new(&config);
    let transaction = service.create_transaction(request, auth.token()).await?;

    Ok(Json(json!(transaction)))
}

#[axum::debug_handler]
pub async fn list_transactions(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = TransactionService::new(&config);
    let transactions = service.list_transactions(query, auth.token()).await?;

    Ok(Json(json!({
        "transactions": transactions,
        "total": transactions.len()
    })))
}

#[axum::debug_handler]
pub async fn get_transaction(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = TransactionService::new(&config);
    let transaction = service.get_transaction(transaction_id, auth.token()).await?;

    Ok(Json(json!(transaction)))
}

#[axum::debug_handler]
pub async fn update_transaction(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<UpdateTransactionRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = TransactionService::new(&config);
    let transaction = service.update_transaction(transaction_id, request, auth.token()).await?;

    Ok(Json(json!(transaction)))
}

#[axum::debug_handler]
pub async fn pay_transaction(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<MarkPaidRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = TransactionService::new(&config);
    let transaction = service.mark_paid(transaction_id, request, auth.token()).await?;

    Ok(Json(json!(transaction)))
}

#[axum::debug_handler]
pub async fn cancel_transaction(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = TransactionService::new(&config);
    let transaction = service.cancel_transaction(transaction_id, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "transaction": transaction
    })))
}

// ==============================================================================
// FINANCIAL ENTRIES
// ==============================================================================

#[axum::debug_handler]
pub async fn list_entries(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<EntryQuery>,
) -> Result<Json<Value>, AppError> {
    query.professional_id = scope_to_user(&user, query.professional_id)?;

    let service = FinancialEntryService::new(&config);
    let entries = service.list_entries(query, auth.token()).await?;

    Ok(Json(json!({
        "entries": entries,
        "total": entries.len()
    })))
}

#[axum::debug_handler]
pub async fn get_entry(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = FinancialEntryService::new(&config);
    let entry = service.get_entry(entry_id, auth.token()).await?;

    scope_to_user(&user, Some(entry.professional_id))?;

    Ok(Json(json!(entry)))
}

#[axum::debug_handler]
pub async fn settle_entry(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
    Json(request): Json<SettleEntryRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let service = FinancialEntryService::new(&config);
    let entry = service.settle_entry(entry_id, request.payment_method, auth.token()).await?;

    Ok(Json(json!(entry)))
}

// ==============================================================================
// SUMMARY
// ==============================================================================

#[axum::debug_handler]
pub async fn get_summary(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<SummaryQuery>,
) -> Result<Json<Value>, AppError> {
    query.professional_id = scope_to_user(&user, query.professional_id)?;

    let service = SummaryService::new(&config);
    let summary = service.summarize(query, auth.token()).await?;

    Ok(Json(json!(summary)))
}
