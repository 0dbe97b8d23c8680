//! Entry lifecycle: Draft entries are finalized or discarded; Final entries
//! are never edited and only corrected by an opposite reversal entry.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::depreciation::{month_bounds, parse_period};
use super::{begin_posting, is_constraint_violation, load_entry, write_entry, JournalBuilder};
use crate::accounts;
use crate::error::{LedgerError, Result};
use crate::models::{CompanyId, EntryStatus, EntryType, JournalEntry};

/// Promote a Draft entry to Final
pub fn finalize_entry(conn: &mut Connection, company: CompanyId, entry_id: i64) -> Result<JournalEntry> {
    let tx = begin_posting(conn)?;
    let entry = load_entry(&tx, company, entry_id)?;
    if entry.status == EntryStatus::Final {
        return Err(LedgerError::AlreadyPosted(format!("entry {} is already final", entry_id)));
    }
    if entry.lines.len() < 2 || !entry.is_balanced() {
        return Err(LedgerError::UnbalancedEntry {
            debit: entry.total_debit(),
            credit: entry.total_credit(),
        });
    }
    for line in &entry.lines {
        accounts::require_active(&tx, company, line.account_id)?;
    }

    let claimed = tx.execute(
        "UPDATE journal_entries SET status = 'FINAL' WHERE company_id = ?1 AND id = ?2 AND status = 'DRAFT'",
        params![company, entry_id],
    )?;
    if claimed == 0 {
        return Err(LedgerError::AlreadyPosted(format!("entry {} is already final", entry_id)));
    }
    tx.commit()?;

    log::info!("Posting: finalized entry {} ({})", entry_id, entry.description);
    load_entry(conn, company, entry_id)
}

/// Delete a Draft entry and give its source documents back
pub fn discard_draft_entry(conn: &mut Connection, company: CompanyId, entry_id: i64) -> Result<()> {
    let tx = begin_posting(conn)?;
    let entry = load_entry(&tx, company, entry_id)?;
    if entry.status != EntryStatus::Draft {
        return Err(LedgerError::validation(format!(
            "Entry {} is final; correct it with a reversal",
            entry_id
        )));
    }

    release_links(&tx, company, entry_id)?;
    let deleted = tx.execute(
        "DELETE FROM journal_entries WHERE company_id = ?1 AND id = ?2 AND status = 'DRAFT'",
        params![company, entry_id],
    )?;
    if deleted == 0 {
        return Err(LedgerError::not_found("JournalEntry", entry_id));
    }
    tx.commit()?;

    log::info!("Posting: discarded draft entry {} ({})", entry_id, entry.description);
    Ok(())
}

/// Post the mirror image of a Final entry and release its source documents
pub fn reverse_entry(
    conn: &mut Connection,
    company: CompanyId,
    entry_id: i64,
    date: NaiveDate,
    description: Option<String>,
) -> Result<JournalEntry> {
    let tx = begin_posting(conn)?;
    let original = load_entry(&tx, company, entry_id)?;
    if original.status != EntryStatus::Final {
        return Err(LedgerError::validation(format!(
            "Entry {} is a draft; discard it instead",
            entry_id
        )));
    }
    if original.entry_type == EntryType::Reversal {
        return Err(LedgerError::validation(format!(
            "Entry {} is itself a reversal",
            entry_id
        )));
    }
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM journal_entries WHERE company_id = ?1 AND reverses_entry_id = ?2",
            params![company, entry_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(reversal_id) = existing {
        return Err(LedgerError::AlreadyPosted(format!(
            "entry {} is already reversed by entry {}",
            entry_id, reversal_id
        )));
    }

    let description = description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("Correctie: {}", original.description));
    let mut builder = JournalBuilder::new(EntryType::Reversal, date, description)
        .contact(original.contact_id)
        .reverses(entry_id);
    if let Some(reference) = &original.reference {
        builder = builder.reference(reference.clone());
    }
    for line in &original.lines {
        if line.debit.is_zero() {
            builder.debit(line.account_id, line.credit, line.description.clone())?;
        } else {
            builder.credit(line.account_id, line.debit, line.description.clone())?;
        }
    }

    let reversal_id = write_entry(&tx, company, &builder.build()?).map_err(|e| match e {
        LedgerError::Database(ref db) if is_constraint_violation(db) => {
            LedgerError::AlreadyPosted(format!("entry {} is already reversed", entry_id))
        }
        other => other,
    })?;
    release_links(&tx, company, entry_id)?;
    tx.commit()?;

    log::info!("Posting: entry {} reversed by entry {}", entry_id, reversal_id);
    load_entry(conn, company, reversal_id)
}

/// Undo the document state changes made when `entry_id` was posted
fn release_links(conn: &Connection, company: CompanyId, entry_id: i64) -> Result<()> {
    let bank = conn.execute(
        "UPDATE bank_transactions SET status = 'UNMATCHED', journal_entry_id = NULL
         WHERE company_id = ?1 AND journal_entry_id = ?2",
        params![company, entry_id],
    )?;
    let invoices = conn.execute(
        "UPDATE invoices SET status = 'DRAFT', journal_entry_id = NULL
         WHERE company_id = ?1 AND journal_entry_id = ?2",
        params![company, entry_id],
    )?;
    let trips = conn.execute(
        "UPDATE mileage_logs SET is_booked = 0, journal_entry_id = NULL
         WHERE company_id = ?1 AND journal_entry_id = ?2",
        params![company, entry_id],
    )?;

    let depreciations: Vec<(i64, i64)> = {
        let mut stmt = conn.prepare(
            "SELECT d.asset_id, d.amount FROM asset_depreciations d
             JOIN fixed_assets a ON a.id = d.asset_id
             WHERE a.company_id = ?1 AND d.journal_entry_id = ?2",
        )?;
        let rows = stmt
            .query_map(params![company, entry_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    for (asset_id, cents) in &depreciations {
        conn.execute(
            "DELETE FROM asset_depreciations WHERE asset_id = ?1 AND journal_entry_id = ?2",
            params![asset_id, entry_id],
        )?;
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(period) FROM asset_depreciations WHERE asset_id = ?1",
            [asset_id],
            |row| row.get(0),
        )?;
        let last_date = match latest {
            Some(period) => Some(month_bounds(parse_period(&period)?)?.1),
            None => None,
        };
        conn.execute(
            "UPDATE fixed_assets
             SET accumulated_depreciation = accumulated_depreciation - ?1,
                 months_depreciated = MAX(months_depreciated - 1, 0),
                 last_depreciation_date = ?2
             WHERE company_id = ?3 AND id = ?4",
            params![cents, last_date, company, asset_id],
        )?;
    }

    if bank + invoices + trips + depreciations.len() > 0 {
        log::debug!(
            "Posting: released entry {} ({} bank rows, {} invoices, {} trips, {} depreciations)",
            entry_id,
            bank,
            invoices,
            trips,
            depreciations.len()
        );
    }
    Ok(())
}
