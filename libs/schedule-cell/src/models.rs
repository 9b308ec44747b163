use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt;

use finance_cell::models::FinancialEntry;
use professional_cell::models::ProfessionalError;
use shared_models::error::AppError;

// ==============================================================================
// JOURNEYS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    Ativa,
    Cancelada,
}

impl fmt::Display for JourneyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JourneyStatus::Ativa => write!(f, "ativa"),
            JourneyStatus::Cancelada => write!(f, "cancelada"),
        }
    }
}

/// A professional's working block on one day, cut into bookable slots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentJourney {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub journey_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub interval_minutes: i32,
    pub price: Option<f64>,
    pub notes: Option<String>,
    pub status: JourneyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJourneyRequest {
    pub professional_id: Uuid,
    pub journey_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: Option<i32>,
    pub interval_minutes: Option<i32>,
    pub price: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JourneyQuery {
    pub professional_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub include_cancelled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyCancellation {
    pub journey: AppointmentJourney,
    pub cancelled_slots: Vec<AppointmentSlot>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyWithSlots {
    #[serde(flatten)]
    pub journey: AppointmentJourney,
    pub slots: Vec<AppointmentSlot>,
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Disponivel,
    Agendado,
    EmAndamento,
    Concluido,
    Cancelado,
    NoShow,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Disponivel => "disponivel",
            SlotStatus::Agendado => "agendado",
            SlotStatus::EmAndamento => "em_andamento",
            SlotStatus::Concluido => "concluido",
            SlotStatus::Cancelado => "cancelado",
            SlotStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotStatus::Concluido | SlotStatus::Cancelado | SlotStatus::NoShow)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentSlot {
    pub id: Uuid,
    pub journey_id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SlotStatus,
    pub price: Option<f64>,
    pub service_type: Option<String>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Window produced by cutting a journey; not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotRequest {
    pub patient_id: Uuid,
    pub service_type: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelSlotRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotQuery {
    pub date: Option<NaiveDate>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub professional_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<SlotStatus>,
    pub limit: Option<i32>,
}

// ==============================================================================
// HISTORY AND OUTCOMES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentHistory {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub professional_id: Uuid,
    pub from_status: Option<SlotStatus>,
    pub to_status: SlotStatus,
    pub changed_by: String,
    pub reason: Option<String>,
    pub duration_minutes: Option<i32>,
    pub changed_at: DateTime<Utc>,
}

/// Result of an applied transition. The slot change itself always
/// succeeded; anything that failed afterwards is listed in `warnings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotTransitionOutcome {
    pub slot: AppointmentSlot,
    pub history: Option<AppointmentHistory>,
    pub financial_entry: Option<FinancialEntry>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotEvent {
    pub slot_id: Uuid,
    pub journey_id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub from_status: SlotStatus,
    pub to_status: SlotStatus,
    pub occurred_at: DateTime<Utc>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error, PartialEq)]
pub enum ScheduleError {
    #[error("Journey not found")]
    JourneyNotFound,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Invalid journey: {0}")]
    InvalidJourney(String),

    #[error("Journey overlaps an existing journey on {0}")]
    JourneyOverlap(NaiveDate),

    #[error("Journey cannot be cancelled: {0}")]
    JourneyLocked(String),

    #[error("Cannot move slot from {from} to {to}")]
    InvalidTransition { from: SlotStatus, to: SlotStatus },

    #[error("Slot changed concurrently, it is now {current}")]
    StaleSlot { current: SlotStatus },

    #[error("Professional is not available: {0}")]
    ProfessionalUnavailable(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<anyhow::Error> for ScheduleError {
    fn from(e: anyhow::Error) -> Self {
        ScheduleError::DatabaseError(e.to_string())
    }
}

impl From<ProfessionalError> for ScheduleError {
    fn from(e: ProfessionalError) -> Self {
        match e {
            ProfessionalError::NotFound | ProfessionalError::Inactive => {
                ScheduleError::ProfessionalUnavailable(e.to_string())
            }
            ProfessionalError::ValidationError(msg) => ScheduleError::ValidationError(msg),
            ProfessionalError::EmailAlreadyExists { .. } | ProfessionalError::DatabaseError(_) => {
                ScheduleError::DatabaseError(e.to_string())
            }
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::JourneyNotFound | ScheduleError::SlotNotFound => {
                AppError::NotFound(e.to_string())
            }
            ScheduleError::InvalidJourney(_) | ScheduleError::ValidationError(_) => {
                AppError::ValidationError(e.to_string())
            }
            ScheduleError::JourneyOverlap(_)
            | ScheduleError::JourneyLocked(_)
            | ScheduleError::InvalidTransition { .. }
            | ScheduleError::StaleSlot { .. } => AppError::Conflict(e.to_string()),
            ScheduleError::ProfessionalUnavailable(_) => AppError::BadRequest(e.to_string()),
            ScheduleError::Forbidden(msg) => AppError::Forbidden(msg),
            ScheduleError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
