//! Posting Engine
//!
//! Turns business events into balanced double-entry journal entries. Every
//! posting function opens one `IMMEDIATE` transaction: the entry header, its
//! lines, status flips and link writes commit together or not at all. The
//! "already posted" guard is a conditional status update evaluated inside
//! that transaction, so two concurrent posts of the same document cannot
//! both succeed.

pub mod bank;
pub mod depreciation;
pub mod lifecycle;
pub mod mileage;
pub mod purchase;
pub mod sales;
pub mod trial_balance;

use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::accounts;
use crate::error::{LedgerError, Result};
use crate::models::{round_money, to_cents, CompanyId, EntryStatus, EntryType, JournalEntry, JournalLine};

pub use bank::{book_bank_transaction, post_bank_match, BankBooking};
pub use depreciation::{run_depreciation, run_depreciation_for_company, DepreciationOutcome, DepreciationStatus};
pub use lifecycle::{discard_draft_entry, finalize_entry, reverse_entry};
pub use mileage::run_mileage_reimbursement;
pub use purchase::{book_purchase_invoice, PaymentDisposition};
pub use sales::finalize_sales_invoice;
pub use trial_balance::{trial_balance, TrialBalance, TrialBalanceRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DraftLine {
    pub account_id: i64,
    pub side: Side,
    /// Always positive
    pub amount: Decimal,
    pub description: String,
}

/// Collects lines for one journal entry
#[derive(Debug, Clone)]
pub struct JournalBuilder {
    entry_type: EntryType,
    entry_date: NaiveDate,
    description: String,
    reference: Option<String>,
    status: EntryStatus,
    contact_id: Option<i64>,
    reverses_entry_id: Option<i64>,
    lines: Vec<DraftLine>,
}

/// An entry that passed the balance check; the only thing `write_entry` accepts
#[derive(Debug, Clone)]
pub struct BalancedEntry {
    entry_type: EntryType,
    entry_date: NaiveDate,
    description: String,
    reference: Option<String>,
    status: EntryStatus,
    contact_id: Option<i64>,
    reverses_entry_id: Option<i64>,
    lines: Vec<DraftLine>,
}

impl BalancedEntry {
    pub fn lines(&self) -> &[DraftLine] {
        &self.lines
    }

    pub fn total(&self) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.side == Side::Debit)
            .map(|l| l.amount)
            .sum()
    }
}

impl JournalBuilder {
    /// New builder; entries are Final unless set otherwise
    pub fn new(entry_type: EntryType, entry_date: NaiveDate, description: impl Into<String>) -> Self {
        Self {
            entry_type,
            entry_date,
            description: description.into(),
            reference: None,
            status: EntryStatus::Final,
            contact_id: None,
            reverses_entry_id: None,
            lines: Vec::new(),
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn contact(mut self, contact_id: Option<i64>) -> Self {
        self.contact_id = contact_id;
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn reverses(mut self, entry_id: i64) -> Self {
        self.reverses_entry_id = Some(entry_id);
        self
    }

    /// Add a line; a negative amount lands on the opposite side
    pub fn line(&mut self, account_id: i64, side: Side, amount: Decimal, description: impl Into<String>) -> Result<()> {
        if amount.is_zero() {
            return Err(LedgerError::validation(format!(
                "Zero amount line on account {} in '{}'",
                account_id, self.description
            )));
        }
        if round_money(amount) != amount {
            return Err(LedgerError::validation(format!(
                "Amount {} has more than two decimals",
                amount
            )));
        }
        to_cents(amount)?;
        let (side, amount) = if amount.is_sign_negative() {
            (side.opposite(), -amount)
        } else {
            (side, amount)
        };
        self.lines.push(DraftLine {
            account_id,
            side,
            amount,
            description: description.into(),
        });
        Ok(())
    }

    pub fn debit(&mut self, account_id: i64, amount: Decimal, description: impl Into<String>) -> Result<()> {
        self.line(account_id, Side::Debit, amount, description)
    }

    pub fn credit(&mut self, account_id: i64, amount: Decimal, description: impl Into<String>) -> Result<()> {
        self.line(account_id, Side::Credit, amount, description)
    }

    pub fn total_debit(&self) -> Decimal {
        self.side_total(Side::Debit)
    }

    pub fn total_credit(&self) -> Decimal {
        self.side_total(Side::Credit)
    }

    fn side_total(&self, side: Side) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.side == side)
            .map(|l| l.amount)
            .sum()
    }

    /// Check the entry balances exactly; differences are never absorbed
    pub fn build(self) -> Result<BalancedEntry> {
        let debit = self.total_debit();
        let credit = self.total_credit();
        if self.lines.len() < 2 || debit != credit {
            return Err(LedgerError::UnbalancedEntry { debit, credit });
        }
        Ok(BalancedEntry {
            entry_type: self.entry_type,
            entry_date: self.entry_date,
            description: self.description,
            reference: self.reference,
            status: self.status,
            contact_id: self.contact_id,
            reverses_entry_id: self.reverses_entry_id,
            lines: self.lines,
        })
    }
}

/// Start the write transaction every posting runs in
pub(crate) fn begin_posting(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

/// Persist a balanced entry with its lines; returns the entry id
pub fn write_entry(conn: &Connection, company: CompanyId, entry: &BalancedEntry) -> Result<i64> {
    for line in &entry.lines {
        accounts::require_active(conn, company, line.account_id)?;
    }

    let uuid = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO journal_entries (uuid, company_id, entry_date, description, reference,
                                      entry_type, status, contact_id, reverses_entry_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            uuid,
            company,
            entry.entry_date,
            entry.description,
            entry.reference,
            entry.entry_type,
            entry.status,
            entry.contact_id,
            entry.reverses_entry_id
        ],
    )?;
    let entry_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(
        "INSERT INTO journal_lines (entry_id, position, account_id, debit, credit, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, line) in entry.lines.iter().enumerate() {
        let cents = to_cents(line.amount)?;
        let (debit, credit) = match line.side {
            Side::Debit => (cents, 0),
            Side::Credit => (0, cents),
        };
        stmt.execute(params![
            entry_id,
            position as i64,
            line.account_id,
            debit,
            credit,
            line.description
        ])?;
    }

    log::debug!(
        "Posting: wrote {} entry {} ({} lines, {})",
        entry.entry_type,
        entry_id,
        entry.lines.len(),
        entry.total()
    );
    Ok(entry_id)
}

pub fn load_entry(conn: &Connection, company: CompanyId, entry_id: i64) -> Result<JournalEntry> {
    let sql = format!(
        "SELECT {} FROM journal_entries WHERE company_id = ?1 AND id = ?2",
        JournalEntry::COLUMNS
    );
    let mut entry = conn
        .query_row(&sql, params![company, entry_id], JournalEntry::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("JournalEntry", entry_id))?;

    let sql = format!(
        "SELECT {} FROM journal_lines WHERE entry_id = ?1 ORDER BY position",
        JournalLine::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    entry.lines = stmt
        .query_map([entry_id], JournalLine::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entry)
}

pub fn list_entries(
    conn: &Connection,
    company: CompanyId,
    status: Option<EntryStatus>,
) -> Result<Vec<JournalEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM journal_entries
         WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY entry_date, id",
    )?;
    let ids = stmt
        .query_map(params![company, status], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    ids.into_iter().map(|id| load_entry(conn, company, id)).collect()
}
