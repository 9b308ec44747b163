use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "receptionist".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn professional(email: &str) -> Self {
        Self::new(email, "professional")
    }

    pub fn receptionist(email: &str) -> Self {
        Self::new(email, "receptionist")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows for the clinic tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn professional_response(id: &str, full_name: &str, commission_percentage: f64) -> serde_json::Value {
        json!({
            "id": id,
            "full_name": full_name,
            "email": "profissional@clinica.test",
            "phone": "5511999990000",
            "specialty": "Psicologia",
            "council_registration": "CRP 06/123456",
            "default_session_minutes": 50,
            "default_price": 200.0,
            "commission_percentage": commission_percentage,
            "is_active": true,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn patient_response(id: &str, full_name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "full_name": full_name,
            "cpf": "52998224725",
            "email": "paciente@clinica.test",
            "phone": "5511988880000",
            "birth_date": "1990-05-17",
            "address": null,
            "guardian_name": null,
            "notes": null,
            "is_active": true,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn journey_response(id: &str, professional_id: &str, date: &str) -> serde_json::Value {
        json!({
            "id": id,
            "professional_id": professional_id,
            "journey_date": date,
            "start_time": "08:00:00",
            "end_time": "12:00:00",
            "slot_duration_minutes": 50,
            "interval_minutes": 10,
            "price": 200.0,
            "notes": null,
            "status": "ativa",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn slot_response(
        id: &str,
        journey_id: &str,
        professional_id: &str,
        patient_id: Option<&str>,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "journey_id": journey_id,
            "professional_id": professional_id,
            "patient_id": patient_id,
            "slot_date": "2026-10-20",
            "start_time": "08:00:00",
            "end_time": "08:50:00",
            "status": status,
            "price": 200.0,
            "service_type": null,
            "notes": null,
            "cancellation_reason": null,
            "started_at": null,
            "finished_at": null,
            "duration_minutes": null,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn history_response(slot_id: &str, professional_id: &str, from_status: &str, to_status: &str) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4().to_string(),
            "slot_id": slot_id,
            "patient_id": null,
            "professional_id": professional_id,
            "from_status": from_status,
            "to_status": to_status,
            "changed_by": Uuid::new_v4().to_string(),
            "reason": null,
            "duration_minutes": null,
            "changed_at": "2026-10-20T08:00:00Z"
        })
    }

    pub fn transaction_response(id: &str, slot_id: Option<&str>, amount: f64, status: &str) -> serde_json::Value {
        json!({
            "id": id,
            "kind": "receita",
            "category": "consulta",
            "description": "Consulta",
            "amount": amount,
            "status": status,
            "payment_method": null,
            "due_date": "2026-10-20",
            "paid_at": null,
            "patient_id": null,
            "professional_id": null,
            "slot_id": slot_id,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn entry_response(
        id: &str,
        slot_id: &str,
        transaction_id: &str,
        professional_id: &str,
        gross_amount: f64,
        commission_percentage: f64,
    ) -> serde_json::Value {
        let clinic_amount = (gross_amount * commission_percentage).round() / 100.0;
        json!({
            "id": id,
            "slot_id": slot_id,
            "transaction_id": transaction_id,
            "patient_id": null,
            "professional_id": professional_id,
            "gross_amount": gross_amount,
            "commission_percentage": commission_percentage,
            "clinic_amount": clinic_amount,
            "professional_amount": gross_amount - clinic_amount,
            "status": "pendente",
            "created_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}
