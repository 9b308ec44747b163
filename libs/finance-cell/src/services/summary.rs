use std::collections::BTreeMap;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    EntryStatus, FinanceError, FinanceSummary, FinancialEntry, ProfessionalPayout, SummaryQuery,
    Transaction, TransactionKind, TransactionStatus,
};
use crate::services::ledger::round_currency;

const MAX_SUMMARY_DAYS: i64 = 366;

pub struct SummaryService {
    supabase: SupabaseClient,
}

impl SummaryService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn summarize(
        &self,
        query: SummaryQuery,
        auth_token: &str,
    ) -> Result<FinanceSummary, FinanceError> {
        debug!("Building finance summary {} .. {}", query.from_date, query.to_date);

        if query.from_date > query.to_date {
            return Err(FinanceError::ValidationError(
                "from_date must not be after to_date".to_string(),
            ));
        }
        if (query.to_date - query.from_date).num_days() > MAX_SUMMARY_DAYS {
            return Err(FinanceError::ValidationError(format!(
                "summary range is limited to {} days",
                MAX_SUMMARY_DAYS
            )));
        }

        let professional_filter = query
            .professional_id
            .map(|id| format!("&professional_id=eq.{}", id))
            .unwrap_or_default();

        let transactions_path = format!(
            "/rest/v1/transactions?due_date=gte.{}&due_date=lte.{}&status=neq.cancelado{}",
            query.from_date, query.to_date, professional_filter
        );
        let transactions: Vec<Transaction> = parse_rows(
            self.supabase.request(Method::GET, &transactions_path, Some(auth_token), None).await?,
        )?;

        let entries_path = format!(
            "/rest/v1/financial_entries?created_at=gte.{}T00:00:00Z&created_at=lt.{}T00:00:00Z{}",
            query.from_date,
            query.to_date.succ_opt().unwrap_or(query.to_date),
            professional_filter
        );
        let entries: Vec<FinancialEntry> = parse_rows(
            self.supabase.request(Method::GET, &entries_path, Some(auth_token), None).await?,
        )?;

        Ok(aggregate(&query, &transactions, &entries))
    }
}

fn parse_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, FinanceError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| FinanceError::DatabaseError(e.to_string())))
        .collect()
}

pub(crate) fn aggregate(
    query: &SummaryQuery,
    transactions: &[Transaction],
    entries: &[FinancialEntry],
) -> FinanceSummary {
    let mut total_income = 0.0;
    let mut total_expense = 0.0;
    let mut pending_receivables = 0.0;
    let mut pending_payables = 0.0;

    for t in transactions {
        match (t.kind, t.status) {
            (TransactionKind::Receita, TransactionStatus::Pago) => total_income += t.amount,
            (TransactionKind::Despesa, TransactionStatus::Pago) => total_expense += t.amount,
            (TransactionKind::Receita, TransactionStatus::Pendente) => pending_receivables += t.amount,
            (TransactionKind::Despesa, TransactionStatus::Pendente) => pending_payables += t.amount,
            (_, TransactionStatus::Cancelado) => {}
        }
    }

    let mut by_professional: BTreeMap<Uuid, ProfessionalPayout> = BTreeMap::new();
    for e in entries {
        let payout = by_professional.entry(e.professional_id).or_insert(ProfessionalPayout {
            professional_id: e.professional_id,
            consultations: 0,
            gross_amount: 0.0,
            clinic_amount: 0.0,
            professional_amount: 0.0,
            pending_amount: 0.0,
        });
        payout.consultations += 1;
        payout.gross_amount += e.gross_amount;
        payout.clinic_amount += e.clinic_amount;
        payout.professional_amount += e.professional_amount;
        if e.status == EntryStatus::Pendente {
            payout.pending_amount += e.professional_amount;
        }
    }

    let payouts = by_professional
        .into_values()
        .map(|p| ProfessionalPayout {
            gross_amount: round_currency(p.gross_amount),
            clinic_amount: round_currency(p.clinic_amount),
            professional_amount: round_currency(p.professional_amount),
            pending_amount: round_currency(p.pending_amount),
            ..p
        })
        .collect();

    FinanceSummary {
        from_date: query.from_date,
        to_date: query.to_date,
        total_income: round_currency(total_income),
        total_expense: round_currency(total_expense),
        balance: round_currency(total_income - total_expense),
        pending_receivables: round_currency(pending_receivables),
        pending_payables: round_currency(pending_payables),
        payouts,
    }
}
