use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;
use chrono::Utc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    CreateTransactionRequest, FinanceError, MarkPaidRequest, Transaction, TransactionQuery,
    TransactionStatus, UpdateTransactionRequest,
};
use crate::services::ledger::round_currency;

pub struct TransactionService {
    supabase: SupabaseClient,
}

impl TransactionService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub fn with_client(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }

    pub async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
        auth_token: &str,
    ) -> Result<Transaction, FinanceError> {
        debug!("Creating {} transaction: {}", request.kind, request.description);

        validate_amount(request.amount)?;
        let category = required_text("category", &request.category)?;
        let description = required_text("description", &request.description)?;

        let paid = request.paid.unwrap_or(false);
        if paid && request.payment_method.is_none() {
            return Err(FinanceError::ValidationError(
                "payment_method is required for a paid transaction".to_string(),
            ));
        }

        let now = Utc::now().to_rfc3339();
        let data = json!({
            "kind": request.kind,
            "category": category,
            "description": description,
            "amount": round_currency(request.amount),
            "status": if paid { TransactionStatus::Pago } else { TransactionStatus::Pendente },
            "payment_method": request.payment_method,
            "due_date": request.due_date.format("%Y-%m-%d").to_string(),
            "paid_at": if paid { Some(now.clone()) } else { None },
            "patient_id": request.patient_id,
            "professional_id": request.professional_id,
            "slot_id": request.slot_id,
            "created_at": now,
            "updated_at": now
        });

        let result: Vec<Value> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/transactions",
            auth_token,
            data,
        ).await?;

        let transaction = first_row(result)?;
        info!("Transaction {} created ({} {:.2})", transaction.id, transaction.kind, transaction.amount);

        Ok(transaction)
    }

    pub async fn get_transaction(
        &self,
        transaction_id: Uuid,
        auth_token: &str,
    ) -> Result<Transaction, FinanceError> {
        let path = format!("/rest/v1/transactions?id=eq.{}", transaction_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        first_row(result)
    }

    pub async fn list_transactions(
        &self,
        query: TransactionQuery,
        auth_token: &str,
    ) -> Result<Vec<Transaction>, FinanceError> {
        debug!("Listing transactions with query: {:?}", query);

        let mut query_parts = vec!["order=due_date.desc".to_string()];

        if let Some(kind) = query.kind {
            query_parts.push(format!("kind=eq.{}", kind));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(professional_id) = query.professional_id {
            query_parts.push(format!("professional_id=eq.{}", professional_id));
        }
        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(from) = query.from_date {
            query_parts.push(format!("due_date=gte.{}", from));
        }
        if let Some(to) = query.to_date {
            query_parts.push(format!("due_date=lte.{}", to));
        }
        query_parts.push(format!("limit={}", query.limit.unwrap_or(100).clamp(1, 500)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let path = format!("/rest/v1/transactions?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        parse_rows(result)
    }

    pub async fn update_transaction(
        &self,
        transaction_id: Uuid,
        request: UpdateTransactionRequest,
        auth_token: &str,
    ) -> Result<Transaction, FinanceError> {
        debug!("Updating transaction: {}", transaction_id);

        let current = self.get_transaction(transaction_id, auth_token).await?;
        if current.status != TransactionStatus::Pendente {
            return Err(FinanceError::TransactionClosed(current.status));
        }

        let mut update_data = serde_json::Map::new();

        if let Some(category) = request.category {
            update_data.insert("category".to_string(), json!(required_text("category", &category)?));
        }
        if let Some(description) = request.description {
            update_data.insert("description".to_string(), json!(required_text("description", &description)?));
        }
        if let Some(amount) = request.amount {
            validate_amount(amount)?;
            update_data.insert("amount".to_string(), json!(round_currency(amount)));
        }
        if let Some(due_date) = request.due_date {
            update_data.insert("due_date".to_string(), json!(due_date.format("%Y-%m-%d").to_string()));
        }
        if let Some(method) = request.payment_method {
            update_data.insert("payment_method".to_string(), json!(method));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.guarded_update(transaction_id, TransactionStatus::Pendente, Value::Object(update_data), auth_token)
            .await
    }

    pub async fn mark_paid(
        &self,
        transaction_id: Uuid,
        request: MarkPaidRequest,
        auth_token: &str,
    ) -> Result<Transaction, FinanceError> {
        info!("Marking transaction {} as paid", transaction_id);

        let current = self.get_transaction(transaction_id, auth_token).await?;
        if current.status != TransactionStatus::Pendente {
            return Err(FinanceError::TransactionClosed(current.status));
        }

        let paid_at = request.paid_at.unwrap_or_else(Utc::now);
        let transaction = self.guarded_update(
            transaction_id,
            TransactionStatus::Pendente,
            json!({
                "status": TransactionStatus::Pago,
                "payment_method": request.payment_method,
                "paid_at": paid_at.to_rfc3339(),
                "updated_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        ).await?;

        // Entries mirror the payment state of their transaction.
        let path = format!("/rest/v1/financial_entries?transaction_id=eq.{}", transaction_id);
        if let Err(e) = self.supabase.request::<Value>(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(json!({ "status": "pago" })),
        ).await {
            error!("Transaction {} paid but linked entries were not updated: {}", transaction_id, e);
            return Err(FinanceError::EntrySyncFailed {
                transaction_id,
                reason: e.to_string(),
            });
        }

        Ok(transaction)
    }

    pub async fn cancel_transaction(
        &self,
        transaction_id: Uuid,
        auth_token: &str,
    ) -> Result<Transaction, FinanceError> {
        info!("Cancelling transaction {}", transaction_id);

        let current = self.get_transaction(transaction_id, auth_token).await?;
        if current.status != TransactionStatus::Pendente {
            return Err(FinanceError::TransactionClosed(current.status));
        }

        self.guarded_update(
            transaction_id,
            TransactionStatus::Pendente,
            json!({
                "status": TransactionStatus::Cancelado,
                "updated_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        ).await
    }

    /// PATCH filtered on the status the caller saw. An empty result means a
    /// concurrent writer moved the row first.
    async fn guarded_update(
        &self,
        transaction_id: Uuid,
        expected: TransactionStatus,
        data: Value,
        auth_token: &str,
    ) -> Result<Transaction, FinanceError> {
        let path = format!(
            "/rest/v1/transactions?id=eq.{}&status=eq.{}",
            transaction_id, expected
        );
        let result: Vec<Value> = self.supabase.request_returning(
            Method::PATCH,
            &path,
            auth_token,
            data,
        ).await?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map_err(|e| FinanceError::DatabaseError(e.to_string())),
            None => {
                let latest = self.get_transaction(transaction_id, auth_token).await?;
                Err(FinanceError::TransactionClosed(latest.status))
            }
        }
    }
}

fn validate_amount(amount: f64) -> Result<(), FinanceError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(FinanceError::InvalidAmount(format!("amount must be positive, got {}", amount)));
    }
    Ok(())
}

fn required_text(field: &str, value: &str) -> Result<String, FinanceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FinanceError::ValidationError(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn first_row(rows: Vec<Value>) -> Result<Transaction, FinanceError> {
    let row = rows.into_iter().next().ok_or(FinanceError::TransactionNotFound)?;
    serde_json::from_value(row).map_err(|e| FinanceError::DatabaseError(e.to_string()))
}

fn parse_rows(rows: Vec<Value>) -> Result<Vec<Transaction>, FinanceError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| FinanceError::DatabaseError(e.to_string())))
        .collect()
}
