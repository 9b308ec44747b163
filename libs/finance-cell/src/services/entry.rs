use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use chrono::Utc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    CreateTransactionRequest, EntryQuery, EntryStatus, FinanceError, FinancialEntry,
    MarkPaidRequest, PaymentMethod, SlotCharge, Transaction, TransactionKind, TransactionStatus,
};
use crate::services::ledger::split_amount;
use crate::services::transaction::TransactionService;

pub const CONSULTATION_CATEGORY: &str = "consulta";

pub struct FinancialEntryService {
    supabase: SupabaseClient,
    transactions: TransactionService,
}

impl FinancialEntryService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = SupabaseClient::new(config);
        Self {
            transactions: TransactionService::with_client(supabase.clone()),
            supabase,
        }
    }

    /// Records the receivable for a concluded consultation.
    ///
    /// Safe to call repeatedly for the same slot: an existing entry is
    /// returned untouched, and a pending transaction left behind by an
    /// earlier partial attempt is reused. Free consultations produce no entry.
    pub async fn create_for_slot(
        &self,
        charge: SlotCharge,
        auth_token: &str,
    ) -> Result<Option<FinancialEntry>, FinanceError> {
        debug!("Creating financial entry for slot {}", charge.slot_id);

        if let Some(existing) = self.find_by_slot(charge.slot_id, auth_token).await? {
            debug!("Slot {} already has entry {}", charge.slot_id, existing.id);
            return Ok(Some(existing));
        }

        let split = split_amount(charge.gross_amount, charge.commission_percentage)?;
        if split.gross_amount == 0.0 {
            info!("Slot {} has no price, skipping financial entry", charge.slot_id);
            return Ok(None);
        }

        let (transaction, created_now) = match self.find_open_transaction(charge.slot_id, auth_token).await? {
            Some(transaction) => (transaction, false),
            None => {
                let transaction = self.transactions.create_transaction(
                    CreateTransactionRequest {
                        kind: TransactionKind::Receita,
                        category: CONSULTATION_CATEGORY.to_string(),
                        description: charge.description.clone(),
                        amount: split.gross_amount,
                        due_date: charge.service_date,
                        payment_method: None,
                        patient_id: charge.patient_id,
                        professional_id: Some(charge.professional_id),
                        slot_id: Some(charge.slot_id),
                        paid: Some(false),
                    },
                    auth_token,
                ).await?;
                (transaction, true)
            }
        };

        let entry_data = json!({
            "slot_id": charge.slot_id,
            "transaction_id": transaction.id,
            "patient_id": charge.patient_id,
            "professional_id": charge.professional_id,
            "gross_amount": split.gross_amount,
            "commission_percentage": charge.commission_percentage,
            "clinic_amount": split.clinic_amount,
            "professional_amount": split.professional_amount,
            "status": EntryStatus::Pendente,
            "created_at": Utc::now().to_rfc3339()
        });

        let inserted: Result<Vec<Value>, anyhow::Error> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/financial_entries",
            auth_token,
            entry_data,
        ).await;

        match inserted {
            Ok(rows) => {
                let entry = first_row(rows)?;
                info!(
                    "Financial entry {} created for slot {} (clinic {:.2}, professional {:.2})",
                    entry.id, charge.slot_id, entry.clinic_amount, entry.professional_amount
                );
                Ok(Some(entry))
            }
            // Unique slot_id: someone else won the race, keep their entry.
            Err(e) if e.to_string().starts_with("Conflict") => {
                warn!("Entry for slot {} was created concurrently", charge.slot_id);
                if created_now {
                    self.discard_transaction(transaction.id, auth_token).await;
                }
                self.find_by_slot(charge.slot_id, auth_token).await
            }
            Err(e) => {
                error!("Failed to insert financial entry for slot {}: {}", charge.slot_id, e);
                if created_now {
                    self.discard_transaction(transaction.id, auth_token).await;
                }
                Err(e.into())
            }
        }
    }

    pub async fn get_entry(
        &self,
        entry_id: Uuid,
        auth_token: &str,
    ) -> Result<FinancialEntry, FinanceError> {
        let path = format!("/rest/v1/financial_entries?id=eq.{}", entry_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        first_row(result)
    }

    pub async fn find_by_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<FinancialEntry>, FinanceError> {
        let path = format!("/rest/v1/financial_entries?slot_id=eq.{}&limit=1", slot_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        match result.into_iter().next() {
            Some(row) => Ok(Some(
                serde_json::from_value(row).map_err(|e| FinanceError::DatabaseError(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub async fn list_entries(
        &self,
        query: EntryQuery,
        auth_token: &str,
    ) -> Result<Vec<FinancialEntry>, FinanceError> {
        debug!("Listing financial entries with query: {:?}", query);

        let mut query_parts = vec!["order=created_at.desc".to_string()];

        if let Some(professional_id) = query.professional_id {
            query_parts.push(format!("professional_id=eq.{}", professional_id));
        }
        if let Some(status) = query.status {
            let status = match status {
                EntryStatus::Pendente => "pendente",
                EntryStatus::Pago => "pago",
            };
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from) = query.from_date {
            query_parts.push(format!("created_at=gte.{}T00:00:00Z", from));
        }
        if let Some(to) = query.to_date.and_then(|d| d.succ_opt()) {
            query_parts.push(format!("created_at=lt.{}T00:00:00Z", to));
        }
        query_parts.push(format!("limit={}", query.limit.unwrap_or(100).clamp(1, 500)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        let path = format!("/rest/v1/financial_entries?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| FinanceError::DatabaseError(e.to_string())))
            .collect()
    }

    /// Settles the entry by paying its transaction. A transaction that is
    /// already paid counts as settled, so an entry left behind by an earlier
    /// partial payment can still be closed.
    pub async fn settle_entry(
        &self,
        entry_id: Uuid,
        payment_method: PaymentMethod,
        auth_token: &str,
    ) -> Result<FinancialEntry, FinanceError> {
        info!("Settling financial entry {}", entry_id);

        let entry = self.get_entry(entry_id, auth_token).await?;
        if entry.status == EntryStatus::Pago {
            return Ok(entry);
        }

        if let Some(transaction_id) = entry.transaction_id {
            match self.transactions.mark_paid(
                transaction_id,
                MarkPaidRequest { payment_method, paid_at: None },
                auth_token,
            ).await {
                Ok(_) => {}
                Err(FinanceError::TransactionClosed(TransactionStatus::Pago)) => {
                    warn!("Transaction {} was already paid, settling entry {} only", transaction_id, entry_id);
                }
                Err(FinanceError::EntrySyncFailed { .. }) => {
                    warn!("Entry sync for transaction {} failed, settling entry {} directly", transaction_id, entry_id);
                }
                Err(e) => return Err(e),
            }
        }

        let path = format!("/rest/v1/financial_entries?id=eq.{}", entry_id);
        let result: Vec<Value> = self.supabase.request_returning(
            Method::PATCH,
            &path,
            auth_token,
            json!({ "status": EntryStatus::Pago }),
        ).await?;

        first_row(result)
    }

    async fn find_open_transaction(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Transaction>, FinanceError> {
        let path = format!(
            "/rest/v1/transactions?slot_id=eq.{}&category=eq.{}&status=eq.pendente&limit=1",
            slot_id, CONSULTATION_CATEGORY
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        match result.into_iter().next() {
            Some(row) => Ok(Some(
                serde_json::from_value(row).map_err(|e| FinanceError::DatabaseError(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn discard_transaction(&self, transaction_id: Uuid, auth_token: &str) {
        if let Err(e) = self.transactions.cancel_transaction(transaction_id, auth_token).await {
            error!("Could not cancel orphaned transaction {}: {}", transaction_id, e);
        }
    }
}

fn first_row(rows: Vec<Value>) -> Result<FinancialEntry, FinanceError> {
    let row = rows.into_iter().next().ok_or(FinanceError::EntryNotFound)?;
    serde_json::from_value(row).map_err(|e| FinanceError::DatabaseError(e.to_string()))
}
