use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use schedule_cell::models::SlotStatus;
use shared_models::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EncounterStatus {
    Rascunho,
    Finalizado,
}

/// Clinical record of one consultation, written in SOAP form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Encounter {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub status: EncounterStatus,
    pub subjective: Option<String>,
    pub objective: Option<String>,
    pub assessment: Option<String>,
    pub plan: Option<String>,
    pub version: i32,
    pub started_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SoapNote {
    pub subjective: Option<String>,
    pub objective: Option<String>,
    pub assessment: Option<String>,
    pub plan: Option<String>,
}

impl SoapNote {
    pub fn is_empty(&self) -> bool {
        self.subjective.is_none()
            && self.objective.is_none()
            && self.assessment.is_none()
            && self.plan.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenEncounterRequest {
    pub slot_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveRequest {
    pub expected_version: i32,
    #[serde(flatten)]
    pub note: SoapNote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub expected_version: i32,
}

// ==============================================================================
// ATTACHMENTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncounterAttachment {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAttachmentRequest {
    pub file_name: String,
    pub content_type: String,
    /// Base64 payload, optionally as a `data:` URL.
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedAttachmentUrl {
    pub attachment_id: Uuid,
    pub url: String,
    pub expires_in: u64,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error, PartialEq)]
pub enum EncounterError {
    #[error("Encounter not found")]
    NotFound,

    #[error("Attachment not found")]
    AttachmentNotFound,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Consultation is {0}, an encounter needs it in progress")]
    SlotNotInProgress(SlotStatus),

    #[error("Encounter was changed elsewhere, current version is {current_version}")]
    VersionConflict { current_version: i32 },

    #[error("Encounter is finalized and can no longer change")]
    AlreadyFinalized,

    #[error("Assessment or plan is required to finalize")]
    IncompleteNote,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("File is {size} bytes, limit is {limit}")]
    FileTooLarge { size: usize, limit: usize },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<anyhow::Error> for EncounterError {
    fn from(e: anyhow::Error) -> Self {
        EncounterError::DatabaseError(e.to_string())
    }
}

impl From<EncounterError> for AppError {
    fn from(e: EncounterError) -> Self {
        match e {
            EncounterError::NotFound
            | EncounterError::AttachmentNotFound
            | EncounterError::SlotNotFound => AppError::NotFound(e.to_string()),
            EncounterError::SlotNotInProgress(_)
            | EncounterError::VersionConflict { .. }
            | EncounterError::AlreadyFinalized => AppError::Conflict(e.to_string()),
            EncounterError::IncompleteNote
            | EncounterError::InvalidFile(_)
            | EncounterError::FileTooLarge { .. } => AppError::ValidationError(e.to_string()),
            EncounterError::ValidationError(msg) => AppError::ValidationError(msg),
            EncounterError::Forbidden(msg) => AppError::Forbidden(msg),
            EncounterError::StorageError(msg) => AppError::ExternalService(msg),
            EncounterError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
