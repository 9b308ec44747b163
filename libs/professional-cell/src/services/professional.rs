use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;
use chrono::Utc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::validation::{is_valid_email, is_valid_phone, non_blank};

use crate::models::{
    Professional, CreateProfessionalRequest, UpdateProfessionalRequest,
    ProfessionalSearchQuery, ProfessionalError, MIN_SESSION_MINUTES, MAX_SESSION_MINUTES,
};

const DEFAULT_SESSION_MINUTES: i32 = 50;

pub struct ProfessionalService {
    supabase: SupabaseClient,
}

impl ProfessionalService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn create_professional(
        &self,
        request: CreateProfessionalRequest,
        auth_token: &str,
    ) -> Result<Professional, ProfessionalError> {
        debug!("Creating professional record for: {}", request.email);

        let email = request.email.trim().to_lowercase();
        let full_name = request.full_name.trim().to_string();
        let session_minutes = request.default_session_minutes.unwrap_or(DEFAULT_SESSION_MINUTES);

        if full_name.is_empty() {
            return Err(ProfessionalError::ValidationError("Full name is required".to_string()));
        }
        if !is_valid_email(&email) {
            return Err(ProfessionalError::ValidationError(format!("Invalid email: {}", email)));
        }
        if request.specialty.trim().is_empty() {
            return Err(ProfessionalError::ValidationError("Specialty is required".to_string()));
        }
        validate_phone(request.phone.as_deref())?;
        validate_session_minutes(session_minutes)?;
        validate_price(request.default_price)?;
        validate_commission(request.commission_percentage)?;

        let existing_path = format!(
            "/rest/v1/professionals?email=eq.{}&select=id",
            urlencoding::encode(&email)
        );
        let existing: Vec<Value> = self.supabase.request(
            Method::GET,
            &existing_path,
            Some(auth_token),
            None,
        ).await?;

        if !existing.is_empty() {
            return Err(ProfessionalError::EmailAlreadyExists { email });
        }

        let now = Utc::now().to_rfc3339();
        let professional_data = json!({
            "full_name": full_name,
            "email": email,
            "phone": non_blank(request.phone),
            "specialty": request.specialty.trim(),
            "council_registration": non_blank(request.council_registration),
            "default_session_minutes": session_minutes,
            "default_price": request.default_price,
            "commission_percentage": request.commission_percentage,
            "is_active": true,
            "created_at": now,
            "updated_at": now
        });

        let result: Vec<Value> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/professionals",
            auth_token,
            professional_data,
        ).await?;

        let professional = first_row(result)?;
        info!("Professional created with ID: {}", professional.id);

        Ok(professional)
    }

    pub async fn get_professional(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<Professional, ProfessionalError> {
        debug!("Fetching professional: {}", professional_id);

        let path = format!("/rest/v1/professionals?id=eq.{}", professional_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        first_row(result)
    }

    /// Like `get_professional`, but refuses deactivated records.
    pub async fn get_active_professional(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<Professional, ProfessionalError> {
        let professional = self.get_professional(professional_id, auth_token).await?;
        if !professional.is_active {
            return Err(ProfessionalError::Inactive);
        }
        Ok(professional)
    }

    pub async fn list_professionals(
        &self,
        query: ProfessionalSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Professional>, ProfessionalError> {
        debug!("Listing professionals with query: {:?}", query);

        let mut query_parts = vec!["order=full_name.asc".to_string()];

        if let Some(specialty) = non_blank(query.specialty) {
            query_parts.push(format!("specialty=ilike.*{}*", urlencoding::encode(&specialty)));
        }
        if query.active_only.unwrap_or(true) {
            query_parts.push("is_active=eq.true".to_string());
        }
        query_parts.push(format!("limit={}", query.limit.unwrap_or(50).clamp(1, 200)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let path = format!("/rest/v1/professionals?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| ProfessionalError::DatabaseError(e.to_string())))
            .collect()
    }

    pub async fn update_professional(
        &self,
        professional_id: Uuid,
        request: UpdateProfessionalRequest,
        auth_token: &str,
    ) -> Result<Professional, ProfessionalError> {
        debug!("Updating professional: {}", professional_id);

        let mut update_data = serde_json::Map::new();

        if let Some(full_name) = request.full_name {
            let full_name = full_name.trim().to_string();
            if full_name.is_empty() {
                return Err(ProfessionalError::ValidationError("Full name is required".to_string()));
            }
            update_data.insert("full_name".to_string(), json!(full_name));
        }
        if let Some(phone) = request.phone {
            validate_phone(Some(&phone))?;
            update_data.insert("phone".to_string(), json!(non_blank(Some(phone))));
        }
        if let Some(specialty) = request.specialty {
            update_data.insert("specialty".to_string(), json!(specialty.trim()));
        }
        if let Some(registration) = request.council_registration {
            update_data.insert("council_registration".to_string(), json!(non_blank(Some(registration))));
        }
        if let Some(minutes) = request.default_session_minutes {
            validate_session_minutes(minutes)?;
            update_data.insert("default_session_minutes".to_string(), json!(minutes));
        }
        if let Some(price) = request.default_price {
            validate_price(price)?;
            update_data.insert("default_price".to_string(), json!(price));
        }
        if let Some(commission) = request.commission_percentage {
            validate_commission(commission)?;
            update_data.insert("commission_percentage".to_string(), json!(commission));
        }

        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/professionals?id=eq.{}", professional_id);
        let result: Vec<Value> = self.supabase.request_returning(
            Method::PATCH,
            &path,
            auth_token,
            Value::Object(update_data),
        ).await?;

        first_row(result)
    }

    pub async fn deactivate_professional(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<Professional, ProfessionalError> {
        info!("Deactivating professional: {}", professional_id);

        let path = format!("/rest/v1/professionals?id=eq.{}", professional_id);
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
}

fn first_row(rows: Vec<Value>) -> Result<Professional, ProfessionalError> {
    let row = rows.into_iter().next().ok_or(ProfessionalError::NotFound)?;
    serde_json::from_value(row).map_err(|e| ProfessionalError::DatabaseError(e.to_string()))
}

fn validate_phone(phone: Option<&str>) -> Result<(), ProfessionalError> {
    match phone.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) if !is_valid_phone(p) => {
            Err(ProfessionalError::ValidationError(format!("Invalid phone number: {}", p)))
        }
        _ => Ok(()),
    }
}

fn validate_session_minutes(minutes: i32) -> Result<(), ProfessionalError> {
    if !(MIN_SESSION_MINUTES..=MAX_SESSION_MINUTES).contains(&minutes) {
        return Err(ProfessionalError::ValidationError(format!(
            "Session length must be between {} and {} minutes",
            MIN_SESSION_MINUTES, MAX_SESSION_MINUTES
        )));
    }
    Ok(())
}

fn validate_price(price: f64) -> Result<(), ProfessionalError> {
    if !price.is_finite() || price < 0.0 {
        return Err(ProfessionalError::ValidationError("Price cannot be negative".to_string()));
    }
    Ok(())
}

fn validate_commission(commission: f64) -> Result<(), ProfessionalError> {
    if !commission.is_finite() || !(0.0..=100.0).contains(&commission) {
        return Err(ProfessionalError::ValidationError(
            "Commission must be between 0 and 100 percent".to_string(),
        ));
    }
    Ok(())
}
