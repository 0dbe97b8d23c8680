//! Posting and journal commands

use rust_decimal::Decimal;

use super::{parse_date, with_connection};
use crate::error::LedgerError;
use crate::models::{CompanyId, EntryStatus, JournalEntry};
use crate::posting::depreciation::parse_period;
use crate::posting::{self, DepreciationOutcome, PaymentDisposition, TrialBalance};

pub fn finalize_sales_invoice(company_id: i64, invoice_id: i64) -> Result<JournalEntry, String> {
    with_connection(|conn| posting::finalize_sales_invoice(conn, CompanyId(company_id), invoice_id))
}

pub fn book_purchase_invoice(
    company_id: i64,
    invoice_id: i64,
    disposition: PaymentDisposition,
) -> Result<JournalEntry, String> {
    with_connection(|conn| posting::book_purchase_invoice(conn, CompanyId(company_id), invoice_id, disposition))
}

/// Depreciate all active assets for the month `period` (`YYYY-MM`)
pub fn run_depreciation(company_id: i64, period: String) -> Result<Vec<DepreciationOutcome>, String> {
    with_connection(|conn| {
        let period = parse_period(&period)?;
        posting::run_depreciation_for_company(conn, CompanyId(company_id), period)
    })
}

pub fn run_mileage_reimbursement(company_id: i64, rate: String, date: String) -> Result<JournalEntry, String> {
    with_connection(|conn| {
        let rate: Decimal = rate
            .trim()
            .replace(',', ".")
            .parse()
            .map_err(|_| LedgerError::validation(format!("Invalid mileage rate '{}'", rate)))?;
        posting::run_mileage_reimbursement(conn, CompanyId(company_id), rate, parse_date(&date)?)
    })
}

pub fn get_journal_entries(company_id: i64, status: Option<EntryStatus>) -> Result<Vec<JournalEntry>, String> {
    with_connection(|conn| posting::list_entries(conn, CompanyId(company_id), status))
}

pub fn finalize_journal_entry(company_id: i64, entry_id: i64) -> Result<JournalEntry, String> {
    with_connection(|conn| posting::finalize_entry(conn, CompanyId(company_id), entry_id))
}

pub fn discard_journal_entry(company_id: i64, entry_id: i64) -> Result<(), String> {
    with_connection(|conn| posting::discard_draft_entry(conn, CompanyId(company_id), entry_id))
}

pub fn reverse_journal_entry(
    company_id: i64,
    entry_id: i64,
    date: String,
    description: Option<String>,
) -> Result<JournalEntry, String> {
    with_connection(|conn| {
        posting::reverse_entry(conn, CompanyId(company_id), entry_id, parse_date(&date)?, description)
    })
}

pub fn get_trial_balance(company_id: i64, include_drafts: bool) -> Result<TrialBalance, String> {
    with_connection(|conn| posting::trial_balance(conn, CompanyId(company_id), include_drafts))
}
