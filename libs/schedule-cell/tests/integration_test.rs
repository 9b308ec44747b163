use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{NaiveDate, NaiveTime};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{MockServer, Mock, ResponseTemplate};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use assert_matches::assert_matches;

use schedule_cell::models::{BookSlotRequest, CreateJourneyRequest, JourneyStatus, ScheduleError, SlotStatus};
use schedule_cell::{schedule_routes, JourneyService, SlotEventHub, SlotService};
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn journey_request(professional_id: Uuid) -> CreateJourneyRequest {
    CreateJourneyRequest {
        professional_id,
        journey_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
        start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        slot_duration_minutes: Some(50),
        interval_minutes: Some(10),
        price: None,
        notes: None,
    }
}

async fn mount_professional(server: &MockServer, professional_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/professionals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::professional_response(&professional_id.to_string(), "Ana Souza", 30.0)
        ])))
        .mount(server)
        .await;
}

fn slot_with(id: Uuid, professional_id: Uuid, status: &str) -> Value {
    MockSupabaseResponses::slot_response(
        &id.to_string(),
        &Uuid::new_v4().to_string(),
        &professional_id.to_string(),
        Some(&Uuid::new_v4().to_string()),
        status,
    )
}

#[tokio::test]
async fn test_create_journey_inserts_derived_slots() {
    let mock_server = MockServer::start().await;
    let professional_id = Uuid::new_v4();
    let journey_id = Uuid::new_v4().to_string();

    mount_professional(&mock_server, professional_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let mut journey = MockSupabaseResponses::journey_response(&journey_id, &professional_id.to_string(), "2026-10-20");
    journey["price"] = Value::Null;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([journey])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let slots: Vec<Value> = (0..4)
        .map(|_| MockSupabaseResponses::slot_response(
            &Uuid::new_v4().to_string(),
            &journey_id,
            &professional_id.to_string(),
            None,
            "disponivel",
        ))
        .collect();
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!(slots)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = JourneyService::new(&config, SlotEventHub::new());

    let created = service.create_journey(journey_request(professional_id), "token").await.unwrap();
    assert_eq!(created.slots.len(), 4);

    let requests = mock_server.received_requests().await.unwrap();
    let slot_insert = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/v1/appointment_slots")
        .unwrap();
    let body: Vec<Value> = serde_json::from_slice(&slot_insert.body).unwrap();
    assert_eq!(body.len(), 4);
    assert_eq!(body[0]["start_time"], "08:00:00");
    assert_eq!(body[3]["end_time"], "11:50:00");
    // Journey has no price, so the professional's default applies.
    assert_eq!(body[0]["price"], 200.0);
    assert_eq!(body[0]["status"], "disponivel");
}

#[tokio::test]
async fn test_overlapping_journey_is_rejected() {
    let mock_server = MockServer::start().await;
    let professional_id = Uuid::new_v4();

    mount_professional(&mock_server, professional_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": Uuid::new_v4(), "start_time": "11:00:00", "end_time": "14:00:00" }
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = JourneyService::new(&config, SlotEventHub::new());

    let result = service.create_journey(journey_request(professional_id), "token").await;
    assert_matches!(result, Err(ScheduleError::JourneyOverlap(_)));
}

#[tokio::test]
async fn test_failed_slot_insert_removes_journey() {
    let mock_server = MockServer::start().await;
    let professional_id = Uuid::new_v4();
    let journey_id = Uuid::new_v4().to_string();

    mount_professional(&mock_server, professional_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::journey_response(&journey_id, &professional_id.to_string(), "2026-10-20")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(500).set_body_json(
            MockSupabaseResponses::error_response("insert failed", "XX000")
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointment_journeys"))
        .and(query_param("id", format!("eq.{}", journey_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = JourneyService::new(&config, SlotEventHub::new());

    let result = service.create_journey(journey_request(professional_id), "token").await;
    assert_matches!(result, Err(ScheduleError::DatabaseError(_)));
}

#[tokio::test]
async fn test_concurrent_booking_loses_with_conflict() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();

    // First read sees the slot free; by the time we re-read, it is taken.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(slot_id, professional_id, "disponivel")
        ])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(slot_id, professional_id, "agendado")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("status", "eq.disponivel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_history"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let hub = SlotEventHub::new();
    let mut listener = hub.subscribe();
    let service = SlotService::new(&config, hub);
    let desk = TestUser::receptionist("recepcao@clinica.test").to_user();

    let result = service.book_slot(
        slot_id,
        BookSlotRequest { patient_id: Uuid::new_v4(), service_type: None, notes: None },
        &desk,
        "token",
    ).await;

    assert_matches!(result, Err(ScheduleError::StaleSlot { current: SlotStatus::Agendado }));
    assert!(listener.try_recv().is_err());
}

#[tokio::test]
async fn test_finish_slot_records_duration_and_financial_entry() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4().to_string();

    let mut started = slot_with(slot_id, professional_id, "em_andamento");
    started["started_at"] = json!("2026-10-20T08:00:00Z");
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([started])))
        .mount(&mock_server)
        .await;

    let mut finished = slot_with(slot_id, professional_id, "concluido");
    finished["duration_minutes"] = json!(50);
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("status", "eq.em_andamento"))
        .and(body_partial_json(json!({ "status": "concluido" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([finished])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_history"))
        .and(body_partial_json(json!({ "from_status": "em_andamento", "to_status": "concluido" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::history_response(&slot_id.to_string(), &professional_id.to_string(), "em_andamento", "concluido")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    mount_professional(&mock_server, professional_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id, Some(&slot_id.to_string()), 200.0, "pendente")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/financial_entries"))
        .and(body_partial_json(json!({ "gross_amount": 200.0, "clinic_amount": 60.0 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::entry_response(
                &Uuid::new_v4().to_string(),
                &slot_id.to_string(),
                &transaction_id,
                &professional_id.to_string(),
                200.0,
                30.0,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let hub = SlotEventHub::new();
    let mut listener = hub.subscribe();
    let service = SlotService::new(&config, hub);
    let me = TestUser::professional("psi@clinica.test").with_id(professional_id).to_user();

    let outcome = service.finish_slot(slot_id, &me, "token").await.unwrap();

    assert_eq!(outcome.slot.status, SlotStatus::Concluido);
    assert!(outcome.history.is_some());
    assert!(outcome.warnings.is_empty(), "unexpected warnings: {:?}", outcome.warnings);
    let entry = outcome.financial_entry.unwrap();
    assert_eq!(entry.professional_amount, 140.0);

    let event = listener.try_recv().unwrap();
    assert_eq!(event.slot_id, slot_id);
    assert_eq!(event.from_status, SlotStatus::EmAndamento);
    assert_eq!(event.to_status, SlotStatus::Concluido);
}

#[tokio::test]
async fn test_finance_failure_is_reported_not_swallowed() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(slot_id, professional_id, "em_andamento")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(slot_id, professional_id, "concluido")
        ])))
        .mount(&mock_server)
        .await;

    // History insert fails too; both problems must surface.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_history"))
        .respond_with(ResponseTemplate::new(500).set_body_json(
            MockSupabaseResponses::error_response("history down", "XX000")
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/professionals"))
        .respond_with(ResponseTemplate::new(503).set_body_json(
            MockSupabaseResponses::error_response("unavailable", "XX000")
        ))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = SlotService::new(&config, SlotEventHub::new());
    let desk = TestUser::admin("admin@clinica.test").to_user();

    let outcome = service.finish_slot(slot_id, &desk, "token").await.unwrap();

    assert_eq!(outcome.slot.status, SlotStatus::Concluido);
    assert!(outcome.history.is_none());
    assert!(outcome.financial_entry.is_none());
    assert_eq!(outcome.warnings.len(), 2);
    assert!(outcome.warnings[0].starts_with("history not recorded"));
    assert!(outcome.warnings[1].starts_with("financial entry not created"));
}

#[tokio::test]
async fn test_retry_financial_entry_requires_concluded_slot() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(slot_id, Uuid::new_v4(), "agendado")
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = SlotService::new(&config, SlotEventHub::new());

    let result = service.retry_financial_entry(slot_id, "token").await;
    assert_matches!(result, Err(ScheduleError::ValidationError(_)));
}

#[tokio::test]
async fn test_cancel_journey_refused_after_consultation_started() {
    let mock_server = MockServer::start().await;
    let journey_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::journey_response(&journey_id.to_string(), &professional_id.to_string(), "2026-10-20")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("journey_id", format!("eq.{}", journey_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(Uuid::new_v4(), professional_id, "concluido"),
            slot_with(Uuid::new_v4(), professional_id, "agendado")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = JourneyService::new(&config, SlotEventHub::new());
    let desk = TestUser::receptionist("recepcao@clinica.test").to_user();

    let result = service.cancel_journey(journey_id, &desk, "token").await;
    assert_matches!(result, Err(ScheduleError::JourneyLocked(_)));
}

#[tokio::test]
async fn test_professional_cannot_book_through_router() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::professional("psi@clinica.test");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    let response = schedule_routes(config.to_arc(), SlotEventHub::new())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/slots/{}/book", Uuid::new_v4()))
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .body(Body::from(json!({ "patient_id": Uuid::new_v4() }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_transition_maps_to_conflict() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(slot_id, Uuid::new_v4(), "no_show")
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::receptionist("recepcao@clinica.test");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    let response = schedule_routes(config.to_arc(), SlotEventHub::new())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/slots/{}/start", slot_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_event_stream_requires_token() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());

    let response = schedule_routes(config.to_arc(), SlotEventHub::new())
        .oneshot(
            Request::builder()
                .uri("/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_event_stream_accepts_query_token() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::receptionist("recepcao@clinica.test");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    // A plain GET passes authentication and then fails the WebSocket handshake.
    let response = schedule_routes(config.to_arc(), SlotEventHub::new())
        .oneshot(
            Request::builder()
                .uri(format!("/events?access_token={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unreadable_slot_rows_remove_journey_and_slots() {
    let mock_server = MockServer::start().await;
    let professional_id = Uuid::new_v4();
    let journey_id = Uuid::new_v4().to_string();

    mount_professional(&mock_server, professional_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::journey_response(&journey_id, &professional_id.to_string(), "2026-10-20")
        ])))
        .mount(&mock_server)
        .await;

    // Stored, but not in a shape we can read back.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": "not-a-uuid" }])))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("journey_id", format!("eq.{}", journey_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointment_journeys"))
        .and(query_param("id", format!("eq.{}", journey_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = JourneyService::new(&config, SlotEventHub::new());

    let result = service.create_journey(journey_request(professional_id), "token").await;
    assert_matches!(result, Err(ScheduleError::DatabaseError(_)));
}

#[tokio::test]
async fn test_cancel_journey_closes_open_slots_then_journey() {
    let mock_server = MockServer::start().await;
    let journey_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();

    let journey = MockSupabaseResponses::journey_response(&journey_id.to_string(), &professional_id.to_string(), "2026-10-20");
    let mut cancelled_journey = journey.clone();
    cancelled_journey["status"] = json!("cancelada");

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([journey])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled_journey.clone()])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("journey_id", format!("eq.{}", journey_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(Uuid::new_v4(), professional_id, "disponivel"),
            slot_with(Uuid::new_v4(), professional_id, "agendado"),
            slot_with(Uuid::new_v4(), professional_id, "cancelado")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(body_partial_json(json!({ "status": "cancelado", "cancellation_reason": "Jornada cancelada" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(Uuid::new_v4(), professional_id, "cancelado")
        ])))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_history"))
        .and(body_partial_json(json!({ "to_status": "cancelado", "reason": "Jornada cancelada" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::history_response(&Uuid::new_v4().to_string(), &professional_id.to_string(), "agendado", "cancelado")
        ])))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_journeys"))
        .and(body_partial_json(json!({ "status": "cancelada" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled_journey])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let hub = SlotEventHub::new();
    let mut listener = hub.subscribe();
    let service = JourneyService::new(&config, hub);
    let desk = TestUser::receptionist("recepcao@clinica.test").to_user();

    let cancellation = service.cancel_journey(journey_id, &desk, "token").await.unwrap();
    assert_eq!(cancellation.cancelled_slots.len(), 2);
    assert!(cancellation.warnings.is_empty(), "unexpected warnings: {:?}", cancellation.warnings);
    assert_eq!(cancellation.journey.status, JourneyStatus::Cancelada);
    assert_eq!(listener.try_recv().unwrap().to_status, SlotStatus::Cancelado);
    assert_eq!(listener.try_recv().unwrap().to_status, SlotStatus::Cancelado);

    // A second cancel finds the journey closed and touches nothing.
    let again = service.cancel_journey(journey_id, &desk, "token").await.unwrap();
    assert!(again.cancelled_slots.is_empty());
    assert_eq!(again.journey.status, JourneyStatus::Cancelada);
}

#[tokio::test]
async fn test_cancel_journey_stays_open_when_a_slot_starts_meanwhile() {
    let mock_server = MockServer::start().await;
    let journey_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::journey_response(&journey_id.to_string(), &professional_id.to_string(), "2026-10-20")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("journey_id", format!("eq.{}", journey_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(first, professional_id, "agendado"),
            slot_with(second, professional_id, "agendado")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("id", format!("eq.{}", first)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(first, professional_id, "cancelado")
        ])))
        .mount(&mock_server)
        .await;

    // The second consultation was started before our update landed.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("id", format!("eq.{}", second)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("id", format!("eq.{}", second)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_with(second, professional_id, "em_andamento")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_history"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::history_response(&first.to_string(), &professional_id.to_string(), "agendado", "cancelado")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_journeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = JourneyService::new(&config, SlotEventHub::new());
    let desk = TestUser::receptionist("recepcao@clinica.test").to_user();

    let result = service.cancel_journey(journey_id, &desk, "token").await;
    match result {
        Err(ScheduleError::JourneyLocked(message)) => {
            assert!(message.contains("em_andamento"), "{}", message);
            assert!(message.contains(&first.to_string()), "{}", message);
        }
        other => panic!("expected a locked journey, got {:?}", other),
    }
}

#[tokio::test]
async fn test_release_clears_booking_and_notifies_listeners() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    let mut booked = MockSupabaseResponses::slot_response(
        &slot_id.to_string(),
        &Uuid::new_v4().to_string(),
        &professional_id.to_string(),
        Some(&patient_id.to_string()),
        "agendado",
    );
    booked["service_type"] = json!("Psicoterapia");
    booked["notes"] = json!("Primeira consulta");

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booked])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("status", "eq.agendado"))
        .and(body_partial_json(json!({
            "status": "disponivel",
            "patient_id": null,
            "service_type": null,
            "notes": null
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &Uuid::new_v4().to_string(),
                &professional_id.to_string(),
                None,
                "disponivel",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The history row keeps the patient the booking belonged to.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_history"))
        .and(body_partial_json(json!({
            "patient_id": patient_id,
            "from_status": "agendado",
            "to_status": "disponivel"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::history_response(&slot_id.to_string(), &professional_id.to_string(), "agendado", "disponivel")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::receptionist("recepcao@clinica.test");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);
    let hub = SlotEventHub::new();
    let mut listener = hub.subscribe();

    let response = schedule_routes(config.to_arc(), hub)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/slots/{}/release", slot_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["slot"]["status"], "disponivel");
    assert!(body["slot"]["patient_id"].is_null());

    let event = listener.try_recv().unwrap();
    assert_eq!(event.slot_id, slot_id);
    assert_eq!(event.from_status, SlotStatus::Agendado);
    assert_eq!(event.to_status, SlotStatus::Disponivel);
    assert_eq!(event.patient_id, Some(patient_id));
}

#[tokio::test]
async fn test_professional_sees_only_own_part_of_patient_history() {
    let mock_server = MockServer::start().await;
    let professional_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_history"))
        .and(query_param("patient_id", format!("eq.{}", patient_id)))
        .and(query_param("professional_id", format!("eq.{}", professional_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::history_response(&Uuid::new_v4().to_string(), &professional_id.to_string(), "agendado", "em_andamento")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::professional("psi@clinica.test").with_id(professional_id);
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    let response = schedule_routes(config.to_arc(), SlotEventHub::new())
        .oneshot(
            Request::builder()
                .uri(format!("/patients/{}/history", patient_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["total"], 1);
}
