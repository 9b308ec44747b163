use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{ScheduleError, SlotStatus};

pub struct SlotLifecycleService;

impl SlotLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: SlotStatus,
        new_status: SlotStatus,
    ) -> Result<(), ScheduleError> {
        debug!("Validating slot transition {} -> {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid slot transition attempted: {} -> {}", current_status, new_status);
            return Err(ScheduleError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: SlotStatus) -> Vec<SlotStatus> {
        match current_status {
            SlotStatus::Disponivel => vec![
                SlotStatus::Agendado,
                SlotStatus::Cancelado,
            ],
            SlotStatus::Agendado => vec![
                SlotStatus::EmAndamento,
                SlotStatus::Cancelado,
                SlotStatus::NoShow,
                SlotStatus::Disponivel,
            ],
            SlotStatus::EmAndamento => vec![
                SlotStatus::Concluido,
                SlotStatus::Cancelado,
            ],
            // Terminal states
            SlotStatus::Concluido | SlotStatus::Cancelado | SlotStatus::NoShow => vec![],
        }
    }

    /// Whole minutes spent in the consultation, rounded up, never below one.
    pub fn consultation_minutes(
        &self,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> i32 {
        let seconds = (finished_at - started_at).num_seconds().max(0);
        let minutes = (seconds + 59) / 60;
        i32::try_from(minutes.max(1)).unwrap_or(i32::MAX)
    }
}

impl Default for SlotLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
