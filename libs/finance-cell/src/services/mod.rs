pub mod entry;
pub mod ledger;
pub mod summary;
pub mod transaction;
