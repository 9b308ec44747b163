use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use chrono::{NaiveTime, Utc};

use professional_cell::ProfessionalService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    AppointmentJourney, AppointmentSlot, CreateJourneyRequest, JourneyCancellation, JourneyQuery,
    JourneyStatus, JourneyWithSlots, ScheduleError, SlotStatus,
};
use crate::services::events::SlotEventHub;
use crate::services::slot::SlotService;
use crate::services::slots::{cut_windows, windows_overlap};

const JOURNEY_CANCELLED_REASON: &str = "Jornada cancelada";

#[derive(Debug, Deserialize)]
struct JourneyBounds {
    id: Uuid,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

pub struct JourneyService {
    supabase: SupabaseClient,
    professionals: ProfessionalService,
    slots: SlotService,
}

impl JourneyService {
    pub fn new(config: &AppConfig, events: SlotEventHub) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            professionals: ProfessionalService::new(config),
            slots: SlotService::new(config, events),
        }
    }

    /// Opens a journey and persists every slot it yields.
    pub async fn create_journey(
        &self,
        request: CreateJourneyRequest,
        auth_token: &str,
    ) -> Result<JourneyWithSlots, ScheduleError> {
        debug!(
            "Creating journey for professional {} on {}",
            request.professional_id, request.journey_date
        );

        if request.end_time <= request.start_time {
            return Err(ScheduleError::InvalidJourney(
                "end time must be after start time".to_string(),
            ));
        }
        if let Some(price) = request.price {
            if !price.is_finite() || price < 0.0 {
                return Err(ScheduleError::InvalidJourney(format!("invalid price: {}", price)));
            }
        }

        let professional = self.professionals
            .get_active_professional(request.professional_id, auth_token)
            .await?;

        let duration = request
            .slot_duration_minutes
            .unwrap_or(professional.default_session_minutes);
        let interval = request.interval_minutes.unwrap_or(0);
        let windows = cut_windows(request.start_time, request.end_time, duration, interval)?;

        self.ensure_no_overlap(&request, auth_token).await?;

        let now = Utc::now().to_rfc3339();
        let journey_data = json!({
            "professional_id": request.professional_id,
            "journey_date": request.journey_date.format("%Y-%m-%d").to_string(),
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "slot_duration_minutes": duration,
            "interval_minutes": interval,
            "price": request.price,
            "notes": request.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()),
            "status": JourneyStatus::Ativa,
            "created_at": now,
            "updated_at": now
        });

        let result: Vec<Value> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/appointment_journeys",
            auth_token,
            journey_data,
        ).await?;
        let journey: AppointmentJourney = first_row(result, ScheduleError::JourneyNotFound)?;

        let slot_price = journey.price.unwrap_or(professional.default_price);
        let slot_rows: Vec<Value> = windows
            .iter()
            .map(|w| json!({
                "journey_id": journey.id,
                "professional_id": journey.professional_id,
                "slot_date": journey.journey_date.format("%Y-%m-%d").to_string(),
                "start_time": w.start_time.format("%H:%M:%S").to_string(),
                "end_time": w.end_time.format("%H:%M:%S").to_string(),
                "status": SlotStatus::Disponivel,
                "price": slot_price,
                "created_at": now,
                "updated_at": now
            }))
            .collect();

        let inserted: Result<Vec<Value>, anyhow::Error> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/appointment_slots",
            auth_token,
            Value::Array(slot_rows),
        ).await;

        let slots = match inserted
            .map_err(ScheduleError::from)
            .and_then(parse_rows::<AppointmentSlot>)
        {
            Ok(slots) => slots,
            Err(e) => {
                error!("Slots for journey {} were not stored, removing journey: {}", journey.id, e);
                self.discard_journey(journey.id, auth_token).await;
                return Err(e);
            }
        };

        info!("Journey {} created with {} slots", journey.id, slots.len());

        Ok(JourneyWithSlots { journey, slots })
    }

    pub async fn get_journey(
        &self,
        journey_id: Uuid,
        auth_token: &str,
    ) -> Result<JourneyWithSlots, ScheduleError> {
        let path = format!("/rest/v1/appointment_journeys?id=eq.{}", journey_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;
        let journey: AppointmentJourney = first_row(result, ScheduleError::JourneyNotFound)?;

        let slots_path = format!(
            "/rest/v1/appointment_slots?journey_id=eq.{}&order=start_time.asc",
            journey_id
        );
        let slots: Vec<Value> = self.supabase.request(
            Method::GET,
            &slots_path,
            Some(auth_token),
            None,
        ).await?;

        Ok(JourneyWithSlots {
            journey,
            slots: parse_rows(slots)?,
        })
    }

    pub async fn list_journeys(
        &self,
        query: JourneyQuery,
        auth_token: &str,
    ) -> Result<Vec<AppointmentJourney>, ScheduleError> {
        debug!("Listing journeys with query: {:?}", query);

        let mut query_parts = vec!["order=journey_date.asc,start_time.asc".to_string()];

        if let Some(professional_id) = query.professional_id {
            query_parts.push(format!("professional_id=eq.{}", professional_id));
        }
        if let Some(from) = query.from_date {
            query_parts.push(format!("journey_date=gte.{}", from));
        }
        if let Some(to) = query.to_date {
            query_parts.push(format!("journey_date=lte.{}", to));
        }
        if !query.include_cancelled.unwrap_or(false) {
            query_parts.push(format!("status=eq.{}", JourneyStatus::Ativa));
        }

        let path = format!("/rest/v1/appointment_journeys?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        parse_rows(result)
    }

    /// Cancels a journey and every slot still open in it. Refused once a
    /// consultation has started or concluded.
    pub async fn cancel_journey(
        &self,
        journey_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<JourneyCancellation, ScheduleError> {
        info!("Cancelling journey {}", journey_id);

        let JourneyWithSlots { journey, slots } = self.get_journey(journey_id, auth_token).await?;

        if journey.status == JourneyStatus::Cancelada {
            return Ok(JourneyCancellation {
                journey,
                cancelled_slots: Vec::new(),
                warnings: Vec::new(),
            });
        }

        if let Some(locked) = slots
            .iter()
            .find(|s| matches!(s.status, SlotStatus::EmAndamento | SlotStatus::Concluido))
        {
            return Err(ScheduleError::JourneyLocked(format!(
                "slot at {} is {}",
                locked.start_time.format("%H:%M"),
                locked.status
            )));
        }

        let mut cancelled_slots: Vec<AppointmentSlot> = Vec::new();
        let mut warnings = Vec::new();

        // The journey only closes once every open slot is closed with it.
        for slot in slots.into_iter().filter(|s| !s.status.is_terminal()) {
            let slot_id = slot.id;
            match self.slots
                .cancel_loaded(slot, Some(JOURNEY_CANCELLED_REASON.to_string()), user, auth_token)
                .await
            {
                Ok(outcome) => {
                    warnings.extend(outcome.warnings);
                    cancelled_slots.push(outcome.slot);
                }
                Err(e) => {
                    let done: Vec<String> = cancelled_slots.iter().map(|s| s.id.to_string()).collect();
                    error!(
                        "Journey {} left open, slot {} was not cancelled: {} (already cancelled: [{}])",
                        journey_id, slot_id, e, done.join(", ")
                    );
                    return Err(match e {
                        ScheduleError::StaleSlot { current } => ScheduleError::JourneyLocked(format!(
                            "slot {} is now {}; already cancelled: [{}]",
                            slot_id, current, done.join(", ")
                        )),
                        ScheduleError::InvalidTransition { from, .. } => ScheduleError::JourneyLocked(format!(
                            "slot {} is {}; already cancelled: [{}]",
                            slot_id, from, done.join(", ")
                        )),
                        other => other,
                    });
                }
            }
        }

        let path = format!("/rest/v1/appointment_journeys?id=eq.{}", journey_id);
        let result: Vec<Value> = self.supabase.request_returning(
            Method::PATCH,
            &path,
            auth_token,
            json!({
                "status": JourneyStatus::Cancelada,
                "updated_at": Utc::now().to_rfc3339()
            }),
        ).await?;
        let journey = first_row(result, ScheduleError::JourneyNotFound)?;

        Ok(JourneyCancellation {
            journey,
            cancelled_slots,
            warnings,
        })
    }

    async fn ensure_no_overlap(
        &self,
        request: &CreateJourneyRequest,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let path = format!(
            "/rest/v1/appointment_journeys?professional_id=eq.{}&journey_date=eq.{}&status=eq.{}&select=id,start_time,end_time",
            request.professional_id,
            request.journey_date,
            JourneyStatus::Ativa
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        for existing in parse_rows::<JourneyBounds>(result)? {
            if windows_overlap(request.start_time, request.end_time, existing.start_time, existing.end_time) {
                warn!(
                    "Journey request overlaps journey {} of professional {}",
                    existing.id, request.professional_id
                );
                return Err(ScheduleError::JourneyOverlap(request.journey_date));
            }
        }

        Ok(())
    }

    /// Removes a journey whose slots could not be stored, slots first.
    async fn discard_journey(&self, journey_id: Uuid, auth_token: &str) {
        let slots_path = format!("/rest/v1/appointment_slots?journey_id=eq.{}", journey_id);
        if let Err(e) = self.supabase.request::<Value>(
            Method::DELETE,
            &slots_path,
            Some(auth_token),
            None,
        ).await {
            error!("Could not remove slots of journey {}: {}", journey_id, e);
        }

        let path = format!("/rest/v1/appointment_journeys?id=eq.{}", journey_id);
        if let Err(e) = self.supabase.request::<Value>(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
        ).await {
            error!("Could not remove journey {} after failed slot insert: {}", journey_id, e);
        }
    }
}

fn first_row<T: serde::de::DeserializeOwned>(rows: Vec<Value>, missing: ScheduleError) -> Result<T, ScheduleError> {
    let row = rows.into_iter().next().ok_or(missing)?;
    serde_json::from_value(row).map_err(|e| ScheduleError::DatabaseError(e.to_string()))
}

fn parse_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, ScheduleError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| ScheduleError::DatabaseError(e.to_string())))
        .collect()
}
