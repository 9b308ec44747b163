use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{MockServer, Mock, ResponseTemplate};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use assert_matches::assert_matches;

use finance_cell::api::{FinancialEntryService, SummaryService, TransactionService};
use finance_cell::finance_routes;
use finance_cell::models::{
    EntryStatus, FinanceError, MarkPaidRequest, PaymentMethod, SlotCharge, SummaryQuery, TransactionStatus,
};
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn charge(slot_id: Uuid, professional_id: Uuid, gross_amount: f64) -> SlotCharge {
    SlotCharge {
        slot_id,
        patient_id: Some(Uuid::new_v4()),
        professional_id,
        service_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
        gross_amount,
        commission_percentage: 30.0,
        description: "Consulta 20/10 08:00".to_string(),
    }
}

#[tokio::test]
async fn test_create_for_slot_creates_transaction_and_split_entry() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .and(query_param("slot_id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/transactions"))
        .and(body_partial_json(json!({
            "kind": "receita",
            "category": "consulta",
            "status": "pendente",
            "amount": 200.0
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id, Some(&slot_id.to_string()), 200.0, "pendente")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/financial_entries"))
        .and(body_partial_json(json!({
            "clinic_amount": 60.0,
            "professional_amount": 140.0,
            "transaction_id": transaction_id
        })))
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
    let service = FinancialEntryService::new(&config);

    let entry = service
        .create_for_slot(charge(slot_id, professional_id, 200.0), "token")
        .await
        .unwrap()
        .expect("entry should be created");

    assert_eq!(entry.slot_id, slot_id);
    assert_eq!(entry.clinic_amount, 60.0);
    assert_eq!(entry.professional_amount, 140.0);
}

#[tokio::test]
async fn test_create_for_slot_returns_existing_entry() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();
    let entry_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .and(query_param("slot_id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::entry_response(
                &entry_id,
                &slot_id.to_string(),
                &Uuid::new_v4().to_string(),
                &professional_id.to_string(),
                200.0,
                30.0,
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = FinancialEntryService::new(&config);

    let entry = service
        .create_for_slot(charge(slot_id, professional_id, 200.0), "token")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(entry.id.to_string(), entry_id);
}

#[tokio::test]
async fn test_free_consultation_has_no_entry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = FinancialEntryService::new(&config);

    let result = service
        .create_for_slot(charge(Uuid::new_v4(), Uuid::new_v4(), 0.0), "token")
        .await
        .unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn test_failed_entry_insert_cancels_new_transaction() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .and(query_param("slot_id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .and(query_param("id", format!("eq.{}", transaction_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id, Some(&slot_id.to_string()), 200.0, "pendente")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id, Some(&slot_id.to_string()), 200.0, "pendente")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(500).set_body_json(
            MockSupabaseResponses::error_response("boom", "XX000")
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/transactions"))
        .and(body_partial_json(json!({ "status": "cancelado" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id, Some(&slot_id.to_string()), 200.0, "cancelado")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = FinancialEntryService::new(&config);

    let result = service
        .create_for_slot(charge(slot_id, Uuid::new_v4(), 200.0), "token")
        .await;

    assert_matches!(result, Err(FinanceError::DatabaseError(_)));
}

#[tokio::test]
async fn test_paying_a_paid_transaction_is_conflict() {
    let mock_server = MockServer::start().await;
    let transaction_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id.to_string(), None, 90.0, "pago")
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = TransactionService::new(&config);

    let result = service
        .mark_paid(
            transaction_id,
            MarkPaidRequest { payment_method: PaymentMethod::Pix, paid_at: None },
            "token",
        )
        .await;

    assert_matches!(result, Err(FinanceError::TransactionClosed(TransactionStatus::Pago)));
}

#[tokio::test]
async fn test_professional_cannot_list_other_professionals_entries() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::professional("psi@clinica.test");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    let response = finance_routes(config.to_arc())
        .oneshot(
            Request::builder()
                .uri(format!("/entries?professional_id={}", Uuid::new_v4()))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_professional_entries_are_scoped_to_self() {
    let mock_server = MockServer::start().await;
    let professional_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .and(query_param("professional_id", format!("eq.{}", professional_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::professional("psi@clinica.test").with_id(professional_id);
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    let response = finance_routes(config.to_arc())
        .oneshot(
            Request::builder()
                .uri("/entries")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_zero_amount_transaction_is_rejected() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::receptionist("recepcao@clinica.test");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    let response = finance_routes(config.to_arc())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/transactions")
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .body(Body::from(json!({
                    "kind": "despesa",
                    "category": "aluguel",
                    "description": "Aluguel outubro",
                    "amount": 0.0,
                    "due_date": "2026-10-05"
                }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

fn paid(mut entry: serde_json::Value) -> serde_json::Value {
    entry["status"] = json!("pago");
    entry
}

#[tokio::test]
async fn test_settle_entry_pays_transaction_and_entry() {
    let mock_server = MockServer::start().await;
    let entry_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4();
    let entry = MockSupabaseResponses::entry_response(
        &entry_id.to_string(),
        &Uuid::new_v4().to_string(),
        &transaction_id.to_string(),
        &Uuid::new_v4().to_string(),
        200.0,
        30.0,
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry.clone()])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id.to_string(), None, 200.0, "pendente")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/transactions"))
        .and(query_param("status", "eq.pendente"))
        .and(body_partial_json(json!({ "status": "pago", "payment_method": "pix" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id.to_string(), None, 200.0, "pago")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/financial_entries"))
        .and(query_param("transaction_id", format!("eq.{}", transaction_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/financial_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([paid(entry)])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = FinancialEntryService::new(&config);

    let settled = service.settle_entry(entry_id, PaymentMethod::Pix, "token").await.unwrap();
    assert_eq!(settled.status, EntryStatus::Pago);
}

#[tokio::test]
async fn test_settle_entry_whose_transaction_is_already_paid() {
    let mock_server = MockServer::start().await;
    let entry_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4();
    let entry = MockSupabaseResponses::entry_response(
        &entry_id.to_string(),
        &Uuid::new_v4().to_string(),
        &transaction_id.to_string(),
        &Uuid::new_v4().to_string(),
        200.0,
        30.0,
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry.clone()])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id.to_string(), None, 200.0, "pago")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/financial_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([paid(entry)])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = FinancialEntryService::new(&config);

    let settled = service.settle_entry(entry_id, PaymentMethod::Dinheiro, "token").await.unwrap();
    assert_eq!(settled.status, EntryStatus::Pago);
}

#[tokio::test]
async fn test_mark_paid_reports_unsynced_entries() {
    let mock_server = MockServer::start().await;
    let transaction_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id.to_string(), None, 200.0, "pendente")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&transaction_id.to_string(), None, 200.0, "pago")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(500).set_body_json(
            MockSupabaseResponses::error_response("entries unavailable", "XX000")
        ))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = TransactionService::new(&config);

    let result = service
        .mark_paid(
            transaction_id,
            MarkPaidRequest { payment_method: PaymentMethod::CartaoDebito, paid_at: None },
            "token",
        )
        .await;

    assert_matches!(result, Err(FinanceError::EntrySyncFailed { transaction_id: id, .. }) if id == transaction_id);
}

#[tokio::test]
async fn test_paid_transaction_is_not_reused_for_new_entry() {
    let mock_server = MockServer::start().await;
    let slot_id = Uuid::new_v4();
    let professional_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .and(query_param("status", "eq.pendente"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&Uuid::new_v4().to_string(), Some(&slot_id.to_string()), 200.0, "pago")
        ])))
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
        .and(body_partial_json(json!({ "transaction_id": transaction_id })))
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
    let service = FinancialEntryService::new(&config);

    let entry = service
        .create_for_slot(charge(slot_id, professional_id, 200.0), "token")
        .await
        .unwrap()
        .expect("entry should be created");
    assert_eq!(entry.transaction_id.map(|id| id.to_string()), Some(transaction_id));
}

#[tokio::test]
async fn test_summary_rejects_inverted_range() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::admin("admin@clinica.test");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    let response = finance_routes(config.to_arc())
        .oneshot(
            Request::builder()
                .uri("/summary?from_date=2026-10-31&to_date=2026-10-01")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_summary_range_is_capped_and_totals_are_built() {
    let mock_server = MockServer::start().await;
    let professional_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .and(query_param("status", "neq.cancelado"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::transaction_response(&Uuid::new_v4().to_string(), None, 200.0, "pago"),
            MockSupabaseResponses::transaction_response(&Uuid::new_v4().to_string(), None, 150.0, "pendente")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/financial_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::entry_response(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &professional_id.to_string(),
                200.0,
                30.0,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = SummaryService::new(&config);

    let too_long = service
        .summarize(
            SummaryQuery {
                from_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                to_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
                professional_id: None,
            },
            "token",
        )
        .await;
    assert_matches!(too_long, Err(FinanceError::ValidationError(_)));

    let summary = service
        .summarize(
            SummaryQuery {
                from_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
                to_date: NaiveDate::from_ymd_opt(2026, 10, 31).unwrap(),
                professional_id: None,
            },
            "token",
        )
        .await
        .unwrap();

    assert_eq!(summary.total_income, 200.0);
    assert_eq!(summary.pending_receivables, 150.0);
    assert_eq!(summary.payouts.len(), 1);
    assert_eq!(summary.payouts[0].professional_id, professional_id);
    assert_eq!(summary.payouts[0].pending_amount, 140.0);
}
