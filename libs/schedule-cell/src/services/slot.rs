use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use chrono::Utc;

use finance_cell::api::FinancialEntryService;
use finance_cell::models::{FinancialEntry, SlotCharge};
use professional_cell::ProfessionalService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    AppointmentHistory, AppointmentSlot, BookSlotRequest, ScheduleError, SlotEvent, SlotQuery,
    SlotStatus, SlotTransitionOutcome,
};
use crate::services::events::SlotEventHub;
use crate::services::lifecycle::SlotLifecycleService;

pub struct SlotService {
    supabase: SupabaseClient,
    lifecycle: SlotLifecycleService,
    professionals: ProfessionalService,
    entries: FinancialEntryService,
    events: SlotEventHub,
}

/// Column changes that ride along with a status change.
struct Transition {
    to: SlotStatus,
    changes: Map<String, Value>,
    reason: Option<String>,
}

impl Transition {
    fn to(status: SlotStatus) -> Self {
        Self {
            to: status,
            changes: Map::new(),
            reason: None,
        }
    }

    fn set(mut self, column: &str, value: Value) -> Self {
        self.changes.insert(column.to_string(), value);
        self
    }

    fn because(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

impl SlotService {
    pub fn new(config: &AppConfig, events: SlotEventHub) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            lifecycle: SlotLifecycleService::new(),
            professionals: ProfessionalService::new(config),
            entries: FinancialEntryService::new(config),
            events,
        }
    }

    pub async fn get_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<AppointmentSlot, ScheduleError> {
        let path = format!("/rest/v1/appointment_slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        let row = result.into_iter().next().ok_or(ScheduleError::SlotNotFound)?;
        parse_row(row)
    }

    pub async fn list_slots(
        &self,
        query: SlotQuery,
        auth_token: &str,
    ) -> Result<Vec<AppointmentSlot>, ScheduleError> {
        debug!("Listing slots with query: {:?}", query);

        let mut query_parts = vec!["order=slot_date.asc,start_time.asc".to_string()];

        if let Some(date) = query.date {
            query_parts.push(format!("slot_date=eq.{}", date));
        }
        if let Some(from) = query.from_date {
            query_parts.push(format!("slot_date=gte.{}", from));
        }
        if let Some(to) = query.to_date {
            query_parts.push(format!("slot_date=lte.{}", to));
        }
        if let Some(professional_id) = query.professional_id {
            query_parts.push(format!("professional_id=eq.{}", professional_id));
        }
        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        query_parts.push(format!("limit={}", query.limit.unwrap_or(200).clamp(1, 500)));

        let path = format!("/rest/v1/appointment_slots?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        result.into_iter().map(parse_row).collect()
    }

    pub async fn book_slot(
        &self,
        slot_id: Uuid,
        request: BookSlotRequest,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        if !user.is_staff() {
            return Err(ScheduleError::Forbidden(
                "Only front-desk staff can book patients".to_string(),
            ));
        }

        let slot = self.get_slot(slot_id, auth_token).await?;
        info!("Booking slot {} for patient {}", slot_id, request.patient_id);

        let transition = Transition::to(SlotStatus::Agendado)
            .set("patient_id", json!(request.patient_id))
            .set("service_type", json!(trimmed(request.service_type)))
            .set("notes", json!(trimmed(request.notes)));

        self.apply(slot, transition, user, auth_token).await
    }

    pub async fn release_slot(
        &self,
        slot_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        let slot = self.authorized_slot(slot_id, user, auth_token).await?;
        info!("Releasing slot {}", slot_id);

        let transition = Transition::to(SlotStatus::Disponivel)
            .set("patient_id", Value::Null)
            .set("service_type", Value::Null)
            .set("notes", Value::Null);

        self.apply(slot, transition, user, auth_token).await
    }

    pub async fn start_slot(
        &self,
        slot_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        let slot = self.authorized_slot(slot_id, user, auth_token).await?;
        info!("Starting consultation in slot {}", slot_id);

        let transition = Transition::to(SlotStatus::EmAndamento)
            .set("started_at", json!(Utc::now().to_rfc3339()));

        self.apply(slot, transition, user, auth_token).await
    }

    /// Concludes the consultation and hands its price over to finance.
    pub async fn finish_slot(
        &self,
        slot_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        let slot = self.authorized_slot(slot_id, user, auth_token).await?;
        info!("Finishing consultation in slot {}", slot_id);

        let finished_at = Utc::now();
        let duration = self.lifecycle.consultation_minutes(
            slot.started_at.unwrap_or(finished_at),
            finished_at,
        );

        let transition = Transition::to(SlotStatus::Concluido)
            .set("finished_at", json!(finished_at.to_rfc3339()))
            .set("duration_minutes", json!(duration));

        let mut outcome = self.apply(slot, transition, user, auth_token).await?;

        match self.charge_slot(&outcome.slot, auth_token).await {
            Ok(entry) => outcome.financial_entry = entry,
            Err(e) => {
                error!("Slot {} concluded but financial entry failed: {}", slot_id, e);
                outcome.warnings.push(format!("financial entry not created: {}", e));
            }
        }

        Ok(outcome)
    }

    pub async fn cancel_slot(
        &self,
        slot_id: Uuid,
        reason: Option<String>,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        let slot = self.authorized_slot(slot_id, user, auth_token).await?;
        self.cancel_loaded(slot, reason, user, auth_token).await
    }

    pub async fn mark_no_show(
        &self,
        slot_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        let slot = self.authorized_slot(slot_id, user, auth_token).await?;
        info!("Marking slot {} as no-show", slot_id);

        self.apply(slot, Transition::to(SlotStatus::NoShow), user, auth_token).await
    }

    /// Takes a free slot out of the agenda.
    pub async fn block_slot(
        &self,
        slot_id: Uuid,
        reason: Option<String>,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        let slot = self.authorized_slot(slot_id, user, auth_token).await?;
        if slot.status != SlotStatus::Disponivel {
            return Err(ScheduleError::InvalidTransition {
                from: slot.status,
                to: SlotStatus::Cancelado,
            });
        }
        info!("Blocking slot {}", slot_id);

        let transition = Transition::to(SlotStatus::Cancelado)
            .set("cancellation_reason", json!(trimmed(reason.clone())))
            .because(reason);

        self.apply(slot, transition, user, auth_token).await
    }

    /// Re-runs the finance cascade for a concluded slot. Calling it again
    /// returns the entry that already exists.
    pub async fn retry_financial_entry(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<FinancialEntry>, ScheduleError> {
        let slot = self.get_slot(slot_id, auth_token).await?;
        if slot.status != SlotStatus::Concluido {
            return Err(ScheduleError::ValidationError(format!(
                "only concluded slots generate financial entries, slot is {}",
                slot.status
            )));
        }

        self.charge_slot(&slot, auth_token).await
    }

    /// Status changes of a patient's appointments, newest first. With a
    /// professional given, only rows of that professional's agenda.
    pub async fn patient_history(
        &self,
        patient_id: Uuid,
        professional_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<AppointmentHistory>, ScheduleError> {
        let mut path = format!(
            "/rest/v1/appointment_history?patient_id=eq.{}&order=changed_at.desc",
            patient_id
        );
        if let Some(professional_id) = professional_id {
            path.push_str(&format!("&professional_id=eq.{}", professional_id));
        }
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| ScheduleError::DatabaseError(e.to_string())))
            .collect()
    }

    pub(crate) async fn cancel_loaded(
        &self,
        slot: AppointmentSlot,
        reason: Option<String>,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        info!("Cancelling slot {} ({})", slot.id, slot.status);

        let transition = Transition::to(SlotStatus::Cancelado)
            .set("cancellation_reason", json!(trimmed(reason.clone())))
            .because(reason);

        self.apply(slot, transition, user, auth_token).await
    }

    async fn authorized_slot(
        &self,
        slot_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<AppointmentSlot, ScheduleError> {
        let slot = self.get_slot(slot_id, auth_token).await?;
        ensure_can_operate(user, &slot)?;
        Ok(slot)
    }

    /// Validates, applies the guarded update, then records history and
    /// publishes the event. Only the update itself can fail the call.
    async fn apply(
        &self,
        slot: AppointmentSlot,
        transition: Transition,
        user: &User,
        auth_token: &str,
    ) -> Result<SlotTransitionOutcome, ScheduleError> {
        let from = slot.status;
        self.lifecycle.validate_status_transition(from, transition.to)?;

        let mut changes = transition.changes;
        changes.insert("status".to_string(), json!(transition.to));
        changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!(
            "/rest/v1/appointment_slots?id=eq.{}&status=eq.{}",
            slot.id, from
        );
        let result: Vec<Value> = self.supabase.request_returning(
            Method::PATCH,
            &path,
            auth_token,
            Value::Object(changes),
        ).await?;

        let updated = match result.into_iter().next() {
            Some(row) => parse_row(row)?,
            None => {
                let latest = self.get_slot(slot.id, auth_token).await?;
                warn!("Slot {} moved to {} before our {} -> {} update", slot.id, latest.status, from, transition.to);
                return Err(ScheduleError::StaleSlot { current: latest.status });
            }
        };

        info!("Slot {} moved {} -> {}", updated.id, from, updated.status);

        let mut warnings = Vec::new();

        // Releasing clears the patient, but the history row still belongs to them.
        let patient_id = updated.patient_id.or(slot.patient_id);
        let history = match self.record_history(&updated, patient_id, from, transition.reason, user, auth_token).await {
            Ok(history) => Some(history),
            Err(e) => {
                error!("Slot {} history was not recorded: {}", updated.id, e);
                warnings.push(format!("history not recorded: {}", e));
                None
            }
        };

        self.events.publish(SlotEvent {
            slot_id: updated.id,
            journey_id: updated.journey_id,
            professional_id: updated.professional_id,
            patient_id,
            from_status: from,
            to_status: updated.status,
            occurred_at: Utc::now(),
        });

        Ok(SlotTransitionOutcome {
            slot: updated,
            history,
            financial_entry: None,
            warnings,
        })
    }

    async fn record_history(
        &self,
        slot: &AppointmentSlot,
        patient_id: Option<Uuid>,
        from: SlotStatus,
        reason: Option<String>,
        user: &User,
        auth_token: &str,
    ) -> Result<AppointmentHistory, ScheduleError> {
        let data = json!({
            "slot_id": slot.id,
            "patient_id": patient_id,
            "professional_id": slot.professional_id,
            "from_status": from,
            "to_status": slot.status,
            "changed_by": user.id,
            "reason": trimmed(reason),
            "duration_minutes": slot.duration_minutes,
            "changed_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/appointment_history",
            auth_token,
            data,
        ).await?;

        let row = result.into_iter().next().ok_or_else(|| {
            ScheduleError::DatabaseError("history insert returned no row".to_string())
        })?;
        serde_json::from_value(row).map_err(|e| ScheduleError::DatabaseError(e.to_string()))
    }

    async fn charge_slot(
        &self,
        slot: &AppointmentSlot,
        auth_token: &str,
    ) -> Result<Option<FinancialEntry>, ScheduleError> {
        let professional = self.professionals
            .get_professional(slot.professional_id, auth_token)
            .await?;

        let charge = SlotCharge {
            slot_id: slot.id,
            patient_id: slot.patient_id,
            professional_id: slot.professional_id,
            service_date: slot.slot_date,
            gross_amount: slot.price.unwrap_or(0.0),
            commission_percentage: professional.commission_percentage,
            description: format!(
                "Consulta {} {} - {}",
                slot.slot_date.format("%d/%m/%Y"),
                slot.start_time.format("%H:%M"),
                professional.full_name
            ),
        };

        self.entries
            .create_for_slot(charge, auth_token)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))
    }
}

/// Staff run any slot; a professional only their own agenda.
pub fn ensure_can_operate(user: &User, slot: &AppointmentSlot) -> Result<(), ScheduleError> {
    if user.is_staff() {
        return Ok(());
    }
    if user.is_professional() && user.id == slot.professional_id.to_string() {
        return Ok(());
    }
    Err(ScheduleError::Forbidden(
        "You can only manage your own appointments".to_string(),
    ))
}

fn parse_row(row: Value) -> Result<AppointmentSlot, ScheduleError> {
    serde_json::from_value(row).map_err(|e| ScheduleError::DatabaseError(e.to_string()))
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
