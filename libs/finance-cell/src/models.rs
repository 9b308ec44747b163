use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

use shared_models::error::AppError;

// ==============================================================================
// TRANSACTIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Receita,
    Despesa,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Receita => write!(f, "receita"),
            TransactionKind::Despesa => write!(f, "despesa"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pendente,
    Pago,
    Cancelado,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pendente => write!(f, "pendente"),
            TransactionStatus::Pago => write!(f, "pago"),
            TransactionStatus::Cancelado => write!(f, "cancelado"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Dinheiro,
    Pix,
    CartaoCredito,
    CartaoDebito,
    Transferencia,
    Convenio,
    Outro,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub category: String,
    pub description: String,
    pub amount: f64,
    pub status: TransactionStatus,
    pub payment_method: Option<PaymentMethod>,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub patient_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub slot_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    pub kind: TransactionKind,
    pub category: String,
    pub description: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub payment_method: Option<PaymentMethod>,
    pub patient_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub slot_id: Option<Uuid>,
    /// Create the transaction already settled.
    pub paid: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTransactionRequest {
    pub category: Option<String>,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPaidRequest {
    pub payment_method: PaymentMethod,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionQuery {
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub professional_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// FINANCIAL ENTRIES (per-consultation split between clinic and professional)
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pendente,
    Pago,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialEntry {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub professional_id: Uuid,
    pub gross_amount: f64,
    pub commission_percentage: f64,
    pub clinic_amount: f64,
    pub professional_amount: f64,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

/// What a concluded consultation is worth, as handed over by the schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotCharge {
    pub slot_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub professional_id: Uuid,
    pub service_date: NaiveDate,
    pub gross_amount: f64,
    pub commission_percentage: f64,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryQuery {
    pub professional_id: Option<Uuid>,
    pub status: Option<EntryStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// SUMMARIES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryQuery {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub professional_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfessionalPayout {
    pub professional_id: Uuid,
    pub consultations: u32,
    pub gross_amount: f64,
    pub clinic_amount: f64,
    pub professional_amount: f64,
    pub pending_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinanceSummary {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub total_income: f64,
    pub total_expense: f64,
    pub balance: f64,
    pub pending_receivables: f64,
    pub pending_payables: f64,
    pub payouts: Vec<ProfessionalPayout>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error, PartialEq)]
pub enum FinanceError {
    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Financial entry not found")]
    EntryNotFound,

    #[error("Transaction is {0} and cannot be changed")]
    TransactionClosed(TransactionStatus),

    #[error("Transaction {transaction_id} is paid but its entries are not: {reason}")]
    EntrySyncFailed { transaction_id: Uuid, reason: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<anyhow::Error> for FinanceError {
    fn from(e: anyhow::Error) -> Self {
        FinanceError::DatabaseError(e.to_string())
    }
}

impl From<FinanceError> for AppError {
    fn from(e: FinanceError) -> Self {
        match e {
            FinanceError::TransactionNotFound | FinanceError::EntryNotFound => {
                AppError::NotFound(e.to_string())
            }
            FinanceError::TransactionClosed(_) => AppError::Conflict(e.to_string()),
            FinanceError::EntrySyncFailed { .. } => AppError::Database(e.to_string()),
            FinanceError::InvalidAmount(_) => AppError::ValidationError(e.to_string()),
            FinanceError::ValidationError(msg) => AppError::ValidationError(msg),
            FinanceError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
