use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use chrono::Utc;

use schedule_cell::models::{AppointmentSlot, SlotStatus};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{Encounter, EncounterError, EncounterStatus, SoapNote};

pub struct EncounterService {
    supabase: SupabaseClient,
}

impl EncounterService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Starts the clinical record for a consultation in progress, or hands
    /// back the draft already open for it.
    pub async fn open_encounter(
        &self,
        slot_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Encounter, EncounterError> {
        debug!("Opening encounter for slot {}", slot_id);

        ensure_clinical_reader(user)?;
        let slot = self.get_slot(slot_id, auth_token).await?;
        ensure_treating(user, &slot)?;

        if let Some(existing) = self.find_by_slot(slot_id, auth_token).await? {
            if existing.status == EncounterStatus::Finalizado {
                return Err(EncounterError::AlreadyFinalized);
            }
            debug!("Slot {} already has draft {}", slot_id, existing.id);
            return Ok(existing);
        }

        if slot.status != SlotStatus::EmAndamento {
            return Err(EncounterError::SlotNotInProgress(slot.status));
        }
        let patient_id = slot.patient_id.ok_or_else(|| {
            EncounterError::ValidationError("slot has no patient".to_string())
        })?;

        let now = Utc::now().to_rfc3339();
        let result: Vec<Value> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/encounters",
            auth_token,
            json!({
                "slot_id": slot.id,
                "patient_id": patient_id,
                "professional_id": slot.professional_id,
                "status": EncounterStatus::Rascunho,
                "version": 1,
                "started_at": now,
                "updated_at": now
            }),
        ).await?;

        let encounter = first_row(result)?;
        info!("Encounter {} opened for slot {}", encounter.id, slot_id);

        Ok(encounter)
    }

    pub async fn get_encounter(
        &self,
        encounter_id: Uuid,
        auth_token: &str,
    ) -> Result<Encounter, EncounterError> {
        let path = format!("/rest/v1/encounters?id=eq.{}", encounter_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        first_row(result)
    }

    /// Partial SOAP update. Only succeeds against the version the editor
    /// last saw.
    pub async fn autosave_draft(
        &self,
        encounter_id: Uuid,
        note: SoapNote,
        expected_version: i32,
        user: &User,
        auth_token: &str,
    ) -> Result<Encounter, EncounterError> {
        debug!("Autosaving encounter {} at version {}", encounter_id, expected_version);

        let current = self.get_encounter(encounter_id, auth_token).await?;
        ensure_author(user, &current)?;
        check_editable(&current, expected_version)?;

        if note.is_empty() {
            return Ok(current);
        }

        let mut changes = Map::new();
        for (column, value) in [
            ("subjective", note.subjective),
            ("objective", note.objective),
            ("assessment", note.assessment),
            ("plan", note.plan),
        ] {
            if let Some(text) = value {
                changes.insert(column.to_string(), json!(text));
            }
        }

        self.guarded_update(current, expected_version, changes, auth_token).await
    }

    pub async fn finalize_encounter(
        &self,
        encounter_id: Uuid,
        expected_version: i32,
        user: &User,
        auth_token: &str,
    ) -> Result<Encounter, EncounterError> {
        info!("Finalizing encounter {}", encounter_id);

        let current = self.get_encounter(encounter_id, auth_token).await?;
        ensure_author(user, &current)?;
        check_editable(&current, expected_version)?;

        if is_blank(&current.assessment) && is_blank(&current.plan) {
            return Err(EncounterError::IncompleteNote);
        }

        let mut changes = Map::new();
        changes.insert("status".to_string(), json!(EncounterStatus::Finalizado));
        changes.insert("finalized_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.guarded_update(current, expected_version, changes, auth_token).await
    }

    pub async fn list_patient_encounters(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Encounter>, EncounterError> {
        let path = format!(
            "/rest/v1/encounters?patient_id=eq.{}&order=started_at.desc",
            patient_id
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| EncounterError::DatabaseError(e.to_string())))
            .collect()
    }

    async fn guarded_update(
        &self,
        current: Encounter,
        expected_version: i32,
        mut changes: Map<String, Value>,
        auth_token: &str,
    ) -> Result<Encounter, EncounterError> {
        changes.insert("version".to_string(), json!(expected_version + 1));
        changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!(
            "/rest/v1/encounters?id=eq.{}&version=eq.{}&status=eq.rascunho",
            current.id, expected_version
        );
        let result: Vec<Value> = self.supabase.request_returning(
            Method::PATCH,
            &path,
            auth_token,
            Value::Object(changes),
        ).await?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row).map_err(|e| EncounterError::DatabaseError(e.to_string())),
            None => {
                let latest = self.get_encounter(current.id, auth_token).await?;
                warn!(
                    "Encounter {} save at version {} lost to version {}",
                    current.id, expected_version, latest.version
                );
                if latest.status == EncounterStatus::Finalizado {
                    Err(EncounterError::AlreadyFinalized)
                } else {
                    Err(EncounterError::VersionConflict { current_version: latest.version })
                }
            }
        }
    }

    async fn get_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<AppointmentSlot, EncounterError> {
        let path = format!("/rest/v1/appointment_slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        let row = result.into_iter().next().ok_or(EncounterError::SlotNotFound)?;
        serde_json::from_value(row).map_err(|e| EncounterError::DatabaseError(e.to_string()))
    }

    async fn find_by_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Encounter>, EncounterError> {
        let path = format!("/rest/v1/encounters?slot_id=eq.{}&limit=1", slot_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        match result.into_iter().next() {
            Some(row) => Ok(Some(
                serde_json::from_value(row).map_err(|e| EncounterError::DatabaseError(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}

/// Writing clinical notes is for the treating professional or an admin.
pub fn ensure_author(user: &User, encounter: &Encounter) -> Result<(), EncounterError> {
    if user.is_admin() || user.id == encounter.professional_id.to_string() {
        return Ok(());
    }
    Err(EncounterError::Forbidden(
        "Only the treating professional can edit this encounter".to_string(),
    ))
}

/// Opening a record for a consultation is reserved to whoever runs it.
pub fn ensure_treating(user: &User, slot: &AppointmentSlot) -> Result<(), EncounterError> {
    if user.is_admin() || (user.is_professional() && user.id == slot.professional_id.to_string()) {
        return Ok(());
    }
    Err(EncounterError::Forbidden(
        "Only the professional running this consultation can open its record".to_string(),
    ))
}

/// Reading clinical notes is closed to front-desk roles.
pub fn ensure_clinical_reader(user: &User) -> Result<(), EncounterError> {
    if user.is_admin() || user.is_professional() {
        return Ok(());
    }
    Err(EncounterError::Forbidden(
        "Clinical records are restricted to professionals".to_string(),
    ))
}

fn check_editable(encounter: &Encounter, expected_version: i32) -> Result<(), EncounterError> {
    if encounter.status == EncounterStatus::Finalizado {
        return Err(EncounterError::AlreadyFinalized);
    }
    if encounter.version != expected_version {
        return Err(EncounterError::VersionConflict { current_version: encounter.version });
    }
    Ok(())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn first_row(rows: Vec<Value>) -> Result<Encounter, EncounterError> {
    let row = rows.into_iter().next().ok_or(EncounterError::NotFound)?;
    serde_json::from_value(row).map_err(|e| EncounterError::DatabaseError(e.to_string()))
}
