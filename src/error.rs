//! Error taxonomy for the posting and reconciliation core.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::accounts::system::SystemRole;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed statement file or row.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Parsing finished without a single valid transaction.
    #[error("No valid transactions found in {format} statement ({skipped} rows skipped)")]
    EmptyResult { format: String, skipped: usize },

    #[error("Unsupported statement format: {0}")]
    UnsupportedFormat(String),

    #[error("Unbalanced journal entry: debit {debit} != credit {credit}")]
    UnbalancedEntry { debit: Decimal, credit: Decimal },

    #[error("Already processed: {0}")]
    AlreadyPosted(String),

    #[error("No active account found for system role {0}")]
    SystemAccountNotFound(SystemRole),

    #[error("Multiple active accounts match system role {role}: {candidates:?}")]
    AmbiguousSystemAccount {
        role: SystemRole,
        candidates: Vec<String>,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
