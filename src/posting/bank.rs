//! Bank transaction postings.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::{begin_posting, load_entry, write_entry, JournalBuilder};
use crate::accounts;
use crate::bank_import;
use crate::error::{LedgerError, Result};
use crate::models::{CompanyId, EntryStatus, EntryType, JournalEntry};

/// Counter-account and texts for booking one bank row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankBooking {
    pub target_account_id: i64,
    pub description: String,
    pub reference: Option<String>,
    pub contact_id: Option<i64>,
}

/// Draft entry for a rule match, to be reviewed and finalized
pub fn post_bank_match(
    conn: &mut Connection,
    company: CompanyId,
    bank_transaction_id: i64,
    booking: &BankBooking,
) -> Result<JournalEntry> {
    post_bank_entry(conn, company, bank_transaction_id, booking, EntryType::BankMatch, EntryStatus::Draft)
}

/// Final entry for a bank row booked by hand
pub fn book_bank_transaction(
    conn: &mut Connection,
    company: CompanyId,
    bank_transaction_id: i64,
    target_account_id: i64,
    description: Option<String>,
) -> Result<JournalEntry> {
    let txn = bank_import::get_transaction(conn, company, bank_transaction_id)?;
    let booking = BankBooking {
        target_account_id,
        description: description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(txn.description),
        reference: txn.reference,
        contact_id: None,
    };
    post_bank_entry(conn, company, bank_transaction_id, &booking, EntryType::Manual, EntryStatus::Final)
}

fn post_bank_entry(
    conn: &mut Connection,
    company: CompanyId,
    bank_transaction_id: i64,
    booking: &BankBooking,
    entry_type: EntryType,
    status: EntryStatus,
) -> Result<JournalEntry> {
    let tx = begin_posting(conn)?;

    let txn = bank_import::get_transaction(&tx, company, bank_transaction_id)?;
    if txn.amount.is_zero() {
        return Err(LedgerError::validation(format!(
            "Bank transaction {} has a zero amount",
            txn.id
        )));
    }
    if booking.target_account_id == txn.bank_account_id {
        return Err(LedgerError::validation(
            "Target account cannot be the bank account itself",
        ));
    }
    accounts::require_active(&tx, company, booking.target_account_id)?;

    let claimed = tx.execute(
        "UPDATE bank_transactions SET status = 'MATCHED'
         WHERE company_id = ?1 AND id = ?2 AND status = 'UNMATCHED'",
        params![company, txn.id],
    )?;
    if claimed == 0 {
        return Err(LedgerError::AlreadyPosted(format!(
            "bank transaction {} is already matched",
            txn.id
        )));
    }

    let amount = txn.amount.abs();
    let mut builder = JournalBuilder::new(entry_type, txn.transaction_date, booking.description.clone())
        .contact(booking.contact_id)
        .status(status);
    if let Some(reference) = &booking.reference {
        builder = builder.reference(reference.clone());
    }
    if txn.is_inflow() {
        builder.debit(txn.bank_account_id, amount, txn.description.clone())?;
        builder.credit(booking.target_account_id, amount, booking.description.clone())?;
    } else {
        builder.debit(booking.target_account_id, amount, booking.description.clone())?;
        builder.credit(txn.bank_account_id, amount, txn.description.clone())?;
    }
    let entry_id = write_entry(&tx, company, &builder.build()?)?;

    tx.execute(
        "UPDATE bank_transactions SET journal_entry_id = ?1 WHERE company_id = ?2 AND id = ?3",
        params![entry_id, company, txn.id],
    )?;
    tx.commit()?;

    log::info!(
        "Posting: bank transaction {} ({}) booked to account {} as {} entry {}",
        txn.id,
        txn.amount,
        booking.target_account_id,
        status,
        entry_id
    );
    load_entry(conn, company, entry_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{account_id, count, seeded_connection, COMPANY};
    use crate::models::TransactionStatus;
    use rust_decimal::Decimal;

    fn insert_txn(conn: &Connection, bank: i64, cents: i64, fp: &str) -> i64 {
        conn.execute(
            "INSERT INTO bank_transactions (company_id, bank_account_id, transaction_date, description, amount, fingerprint)
             VALUES (1, ?1, '2024-04-02', 'Betaling factuur 2024-0003', ?2, ?3)",
            params![bank, cents, fp],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_inflow_debits_bank() {
        let mut conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let debiteuren = account_id(&conn, "1300");
        let txn_id = insert_txn(&conn, bank, 121000, "fp-in");

        let entry = book_bank_transaction(&mut conn, COMPANY, txn_id, debiteuren, None).unwrap();
        assert_eq!(entry.status, EntryStatus::Final);
        assert_eq!(entry.entry_type, EntryType::Manual);
        assert_eq!(entry.description, "Betaling factuur 2024-0003");
        assert_eq!(entry.lines[0].account_id, bank);
        assert_eq!(entry.lines[0].debit, Decimal::new(121000, 2));
        assert_eq!(entry.lines[1].account_id, debiteuren);
        assert_eq!(entry.lines[1].credit, Decimal::new(121000, 2));

        let txn = bank_import::get_transaction(&conn, COMPANY, txn_id).unwrap();
        assert_eq!(txn.status, TransactionStatus::Matched);
        assert_eq!(txn.journal_entry_id, Some(entry.id));
    }

    #[test]
    fn test_second_booking_is_already_posted() {
        let mut conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let kantoor = account_id(&conn, "4000");
        let txn_id = insert_txn(&conn, bank, -4599, "fp-out");

        book_bank_transaction(&mut conn, COMPANY, txn_id, kantoor, Some("Toner".to_string())).unwrap();
        assert!(matches!(
            book_bank_transaction(&mut conn, COMPANY, txn_id, kantoor, None),
            Err(LedgerError::AlreadyPosted(_))
        ));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM journal_entries"), 1);
    }

    #[test]
    fn test_zero_amount_and_self_target_rejected() {
        let mut conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let kantoor = account_id(&conn, "4000");
        conn.execute(
            "INSERT INTO bank_transactions (company_id, bank_account_id, transaction_date, description, amount, fingerprint)
             VALUES (1, ?1, '2024-04-02', 'nul', 0, 'fp-zero')",
            [bank],
        )
        .unwrap();
        let zero_id = conn.last_insert_rowid();
        assert!(matches!(
            book_bank_transaction(&mut conn, COMPANY, zero_id, kantoor, None),
            Err(LedgerError::Validation(_))
        ));

        let txn_id = insert_txn(&conn, bank, -100, "fp-self");
        assert!(matches!(
            book_bank_transaction(&mut conn, COMPANY, txn_id, bank, None),
            Err(LedgerError::Validation(_))
        ));
        let txn = bank_import::get_transaction(&conn, COMPANY, txn_id).unwrap();
        assert_eq!(txn.status, TransactionStatus::Unmatched);
    }
}
