pub mod handlers;
pub mod router;
pub mod models;
pub mod services;

pub use models::*;
pub use router::finance_routes;

pub mod api {
    pub use crate::services::entry::FinancialEntryService;
    pub use crate::services::ledger::{round_currency, split_amount, AmountSplit};
    pub use crate::services::summary::SummaryService;
    pub use crate::services::transaction::TransactionService;
}
