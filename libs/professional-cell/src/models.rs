use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use shared_models::error::AppError;

pub const MIN_SESSION_MINUTES: i32 = 5;
pub const MAX_SESSION_MINUTES: i32 = 480;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Professional {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialty: String,
    pub council_registration: Option<String>,
    pub default_session_minutes: i32,
    pub default_price: f64,
    /// Clinic share of each consultation, in percent.
    pub commission_percentage: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfessionalRequest {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialty: String,
    pub council_registration: Option<String>,
    pub default_session_minutes: Option<i32>,
    pub default_price: f64,
    pub commission_percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfessionalRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub council_registration: Option<String>,
    pub default_session_minutes: Option<i32>,
    pub default_price: Option<f64>,
    pub commission_percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfessionalSearchQuery {
    pub specialty: Option<String>,
    pub active_only: Option<bool>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error, PartialEq)]
pub enum ProfessionalError {
    #[error("Professional not found")]
    NotFound,

    #[error("Professional with email {email} already exists")]
    EmailAlreadyExists { email: String },

    #[error("Professional is inactive")]
    Inactive,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<anyhow::Error> for ProfessionalError {
    fn from(e: anyhow::Error) -> Self {
        ProfessionalError::DatabaseError(e.to_string())
    }
}

impl From<ProfessionalError> for AppError {
    fn from(e: ProfessionalError) -> Self {
        match e {
            ProfessionalError::NotFound => AppError::NotFound(e.to_string()),
            ProfessionalError::EmailAlreadyExists { .. } => AppError::Conflict(e.to_string()),
            ProfessionalError::Inactive => AppError::Conflict(e.to_string()),
            ProfessionalError::ValidationError(msg) => AppError::ValidationError(msg),
            ProfessionalError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
