use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;
use chrono::{NaiveDate, Utc};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::validation::{is_valid_cpf, is_valid_email, is_valid_phone, non_blank, only_digits};

use crate::models::{Patient, CreatePatientRequest, UpdatePatientRequest, PatientSearchQuery, PatientError};

pub struct PatientService {
    supabase: SupabaseClient,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn create_patient(
        &self,
        request: CreatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let full_name = request.full_name.trim().to_string();
        debug!("Creating patient record for: {}", full_name);

        if full_name.is_empty() {
            return Err(PatientError::ValidationError("Full name is required".to_string()));
        }

        let cpf = normalize_cpf(request.cpf)?;
        let email = normalize_email(request.email)?;
        let phone = normalize_phone(request.phone)?;
        if let Some(birth_date) = request.birth_date {
            validate_birth_date(birth_date)?;
        }

        if let Some(cpf) = &cpf {
            self.ensure_cpf_is_free(cpf, None, auth_token).await?;
        }

        let now = Utc::now().to_rfc3339();
        let patient_data = json!({
            "full_name": full_name,
            "cpf": cpf,
            "email": email,
            "phone": phone,
            "birth_date": request.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
            "address": non_blank(request.address),
            "guardian_name": non_blank(request.guardian_name),
            "notes": non_blank(request.notes),
            "is_active": true,
            "created_at": now,
            "updated_at": now
        });

        let result: Vec<Value> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/patients",
            auth_token,
            patient_data,
        ).await?;

        let patient = first_row(result)?;
        info!("Patient created with ID: {}", patient.id);

        Ok(patient)
    }

    pub async fn get_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Fetching patient: {}", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        first_row(result)
    }

    pub async fn update_patient(
        &self,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Updating patient: {}", patient_id);

        let mut update_data = serde_json::Map::new();

        if let Some(full_name) = request.full_name {
            let full_name = full_name.trim().to_string();
            if full_name.is_empty() {
                return Err(PatientError::ValidationError("Full name is required".to_string()));
            }
            update_data.insert("full_name".to_string(), json!(full_name));
        }
        if request.cpf.is_some() {
            let cpf = normalize_cpf(request.cpf)?;
            if let Some(cpf) = &cpf {
                self.ensure_cpf_is_free(cpf, Some(patient_id), auth_token).await?;
            }
            update_data.insert("cpf".to_string(), json!(cpf));
        }
        if request.email.is_some() {
            update_data.insert("email".to_string(), json!(normalize_email(request.email)?));
        }
        if request.phone.is_some() {
            update_data.insert("phone".to_string(), json!(normalize_phone(request.phone)?));
        }
        if let Some(birth_date) = request.birth_date {
            validate_birth_date(birth_date)?;
            update_data.insert("birth_date".to_string(), json!(birth_date.format("%Y-%m-%d").to_string()));
        }
        if request.address.is_some() {
            update_data.insert("address".to_string(), json!(non_blank(request.address)));
        }
        if request.guardian_name.is_some() {
            update_data.insert("guardian_name".to_string(), json!(non_blank(request.guardian_name)));
        }
        if request.notes.is_some() {
            update_data.insert("notes".to_string(), json!(non_blank(request.notes)));
        }

        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self.supabase.request_returning(
            Method::PATCH,
            &path,
            auth_token,
            Value::Object(update_data),
        ).await?;

        first_row(result)
    }

    pub async fn archive_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        info!("Archiving patient: {}", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self.supabase.request_returning(
            Method::PATCH,
            &path,
            auth_token,
            json!({
                "is_active": false,
                "updated_at": Utc::now().to_rfc3339()
            }),
        ).await?;

        first_row(result)
    }

    pub async fn search_patients(
        &self,
        query: PatientSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        debug!("Searching patients with query: {:?}", query);

        let mut query_parts = vec!["order=full_name.asc".to_string()];

        if let Some(filter) = query.q.as_deref().and_then(search_filter) {
            query_parts.push(filter);
        }
        if query.active_only.unwrap_or(true) {
            query_parts.push("is_active=eq.true".to_string());
        }
        query_parts.push(format!("limit={}", query.limit.unwrap_or(50).clamp(1, 200)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let path = format!("/rest/v1/patients?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| PatientError::DatabaseError(e.to_string())))
            .collect()
    }

    async fn ensure_cpf_is_free(
        &self,
        cpf: &str,
        exclude_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), PatientError> {
        let mut path = format!("/rest/v1/patients?cpf=eq.{}&select=id", cpf);
        if let Some(id) = exclude_id {
            path.push_str(&format!("&id=neq.{}", id));
        }

        let existing: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        if !existing.is_empty() {
            return Err(PatientError::CpfAlreadyExists { cpf: cpf.to_string() });
        }
        Ok(())
    }
}

/// Builds the PostgREST `or=` filter for a free-text patient search.
fn search_filter(raw: &str) -> Option<String> {
    // Characters that would break the or=(...) grammar are dropped.
    let term: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"'))
        .collect();
    if term.is_empty() {
        return None;
    }

    let mut clauses = vec![format!("full_name.ilike.*{}*", urlencoding::encode(&term))];

    let digits = only_digits(&term);
    if digits.len() >= 3 {
        clauses.push(format!("cpf.ilike.*{}*", digits));
        clauses.push(format!("phone.ilike.*{}*", digits));
    }

    Some(format!("or=({})", clauses.join(",")))
}

fn first_row(rows: Vec<Value>) -> Result<Patient, PatientError> {
    let row = rows.into_iter().next().ok_or(PatientError::NotFound)?;
    serde_json::from_value(row).map_err(|e| PatientError::DatabaseError(e.to_string()))
}

fn normalize_cpf(cpf: Option<String>) -> Result<Option<String>, PatientError> {
    match non_blank(cpf) {
        Some(raw) if is_valid_cpf(&raw) => Ok(Some(only_digits(&raw))),
        Some(_) => Err(PatientError::InvalidCpf),
        None => Ok(None),
    }
}

fn normalize_email(email: Option<String>) -> Result<Option<String>, PatientError> {
    match non_blank(email).map(|e| e.to_lowercase()) {
        Some(e) if !is_valid_email(&e) => {
            Err(PatientError::ValidationError(format!("Invalid email: {}", e)))
        }
        other => Ok(other),
    }
}

/// Phones are stored as bare digits, like CPFs, so searches by number match.
fn normalize_phone(phone: Option<String>) -> Result<Option<String>, PatientError> {
    match non_blank(phone) {
        Some(p) if !is_valid_phone(&p) => {
            Err(PatientError::ValidationError(format!("Invalid phone number: {}", p)))
        }
        other => Ok(other.map(|p| only_digits(&p))),
    }
}

fn validate_birth_date(birth_date: NaiveDate) -> Result<(), PatientError> {
    let today = Utc::now().date_naive();
    let earliest = NaiveDate::from_ymd_opt(1900, 1, 1).ok_or(PatientError::InvalidBirthDate)?;
    if birth_date > today || birth_date < earliest {
        return Err(PatientError::InvalidBirthDate);
    }
    Ok(())
}
