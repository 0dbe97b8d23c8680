//! Bank statement import and reconciliation commands

use std::path::Path;

use super::with_connection;
use crate::bank_import::{self, ImportOptions, StatementImportRecord, StatementImportResult};
use crate::error::LedgerError;
use crate::models::{BankTransaction, CompanyId, JournalEntry, TransactionStatus};
use crate::posting;
use crate::rules::{self, MatchSummary};
use crate::statement_import::csv_templates::{self, BankTemplateSummary};
use crate::statement_import::StatementFormat;

/// Import a statement file from disk into `bank_account_id`
pub fn import_bank_statement(
    company_id: i64,
    bank_account_id: i64,
    path: String,
    declared_format: Option<String>,
    auto_match: Option<bool>,
) -> Result<StatementImportResult, String> {
    let declared_format = match declared_format.as_deref() {
        Some(name) => Some(StatementFormat::parse(name).ok_or_else(|| format!("Unknown statement format '{}'", name))?),
        None => None,
    };
    let bytes = std::fs::read(&path).map_err(|e| format!("Failed to read {}: {}", path, e))?;
    let file_name = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());

    let options = ImportOptions {
        declared_format,
        auto_match: auto_match.unwrap_or(true),
    };
    with_connection(|conn| {
        bank_import::import_statement(conn, CompanyId(company_id), bank_account_id, &bytes, &file_name, options)
    })
}

pub fn get_bank_transactions(company_id: i64, status: Option<String>) -> Result<Vec<BankTransaction>, String> {
    let status = match status {
        Some(raw) => Some(
            raw.trim()
                .to_ascii_uppercase()
                .parse::<TransactionStatus>()
                .map_err(|e| e.to_string())?,
        ),
        None => None,
    };
    with_connection(|conn| bank_import::list_transactions(conn, CompanyId(company_id), status))
}

pub fn get_statement_imports(company_id: i64) -> Result<Vec<StatementImportRecord>, String> {
    with_connection(|conn| bank_import::list_imports(conn, CompanyId(company_id)))
}

pub fn get_bank_templates() -> Vec<BankTemplateSummary> {
    csv_templates::get_template_summaries()
}

pub fn match_unmatched_transactions(company_id: i64) -> Result<MatchSummary, String> {
    with_connection(|conn| rules::match_unmatched(conn, CompanyId(company_id)))
}

/// Book one bank row by hand against `account_id`
pub fn book_bank_transaction(
    company_id: i64,
    bank_transaction_id: i64,
    account_id: i64,
    description: Option<String>,
) -> Result<JournalEntry, String> {
    with_connection(|conn| {
        if account_id <= 0 {
            return Err(LedgerError::validation("A counter account is required"));
        }
        posting::book_bank_transaction(conn, CompanyId(company_id), bank_transaction_id, account_id, description)
    })
}
