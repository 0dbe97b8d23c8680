//! Posting and bank-reconciliation core for sole-proprietor bookkeeping.
//!
//! Bank statements (MT940, CAMT.053, CSV, PDF) are parsed into raw
//! transactions, deduplicated on import and matched against keyword rules.
//! Business events (invoices, bank matches, depreciation, mileage) become
//! balanced double-entry journal entries against accounts resolved by
//! system role.

pub mod accounts;
pub mod assets;
pub mod bank_import;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod invoices;
pub mod mileage;
pub mod models;
pub mod posting;
pub mod rules;
pub mod statement_import;

pub use error::{LedgerError, Result};
pub use models::CompanyId;
