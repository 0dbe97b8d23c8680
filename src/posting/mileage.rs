//! Mileage reimbursement: business kilometres driven with a private car are
//! booked as travel costs paid from private means.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use super::{begin_posting, load_entry, write_entry, JournalBuilder};
use crate::accounts::system::{self, SystemRole};
use crate::error::{LedgerError, Result};
use crate::mileage;
use crate::models::{round_money, CompanyId, EntryType, JournalEntry};

/// Book all unbooked trips in one entry at `rate` per kilometre
pub fn run_mileage_reimbursement(
    conn: &mut Connection,
    company: CompanyId,
    rate: Decimal,
    date: NaiveDate,
) -> Result<JournalEntry> {
    if rate <= Decimal::ZERO {
        return Err(LedgerError::validation(format!("Mileage rate {} must be positive", rate)));
    }
    let tx = begin_posting(conn)?;

    let logs = mileage::unbooked_logs(&tx, company)?;
    if logs.is_empty() {
        return Err(LedgerError::AlreadyPosted("no unbooked trips".to_string()));
    }

    for log in &logs {
        let claimed = tx.execute(
            "UPDATE mileage_logs SET is_booked = 1 WHERE company_id = ?1 AND id = ?2 AND is_booked = 0",
            params![company, log.id],
        )?;
        if claimed == 0 {
            return Err(LedgerError::AlreadyPosted(format!("trip {} is already booked", log.id)));
        }
    }

    let total_km: Decimal = logs.iter().map(|l| l.distance_km).sum();
    let amount = round_money(total_km * rate);
    if amount.is_zero() {
        return Err(LedgerError::validation(format!(
            "{} km at {} rounds to nothing",
            total_km.normalize(),
            rate
        )));
    }

    let travel = system::resolve(&tx, company, SystemRole::TravelCosts)?;
    let private = system::resolve(&tx, company, SystemRole::Private)?;

    let description = format!(
        "Kilometervergoeding {} km à {}",
        total_km.normalize(),
        rate.normalize()
    );
    let mut builder = JournalBuilder::new(EntryType::Mileage, date, description.clone());
    builder.debit(travel.id, amount, description.clone())?;
    builder.credit(private.id, amount, description)?;
    let entry_id = write_entry(&tx, company, &builder.build()?)?;

    for log in &logs {
        tx.execute(
            "UPDATE mileage_logs SET journal_entry_id = ?1 WHERE company_id = ?2 AND id = ?3",
            params![entry_id, company, log.id],
        )?;
    }
    tx.commit()?;

    log::info!(
        "Posting: mileage reimbursement for {} trips ({} km): {}",
        logs.len(),
        total_km.normalize(),
        amount
    );
    load_entry(conn, company, entry_id)
}
