//! Sales invoice posting.

use rusqlite::{params, Connection};

use super::{begin_posting, load_entry, write_entry, JournalBuilder};
use crate::accounts::system::{self, SystemRole};
use crate::error::{LedgerError, Result};
use crate::invoices;
use crate::models::{CompanyId, EntryType, InvoiceDirection, JournalEntry};

/// Finalize a Draft sales invoice: Dr receivables, Cr revenue per line, Cr VAT payable
pub fn finalize_sales_invoice(conn: &mut Connection, company: CompanyId, invoice_id: i64) -> Result<JournalEntry> {
    let tx = begin_posting(conn)?;

    let invoice = invoices::get_invoice(&tx, company, invoice_id)?;
    if invoice.direction != InvoiceDirection::Sales {
        return Err(LedgerError::validation(format!(
            "Invoice {} is not a sales invoice",
            invoice.invoice_number
        )));
    }

    let claimed = tx.execute(
        "UPDATE invoices SET status = 'SENT'
         WHERE company_id = ?1 AND id = ?2 AND status = 'DRAFT'",
        params![company, invoice.id],
    )?;
    if claimed == 0 {
        return Err(LedgerError::AlreadyPosted(format!(
            "sales invoice {} is already finalized",
            invoice.invoice_number
        )));
    }

    invoices::validate_for_posting(&invoice, true)?;

    let receivable = system::resolve(&tx, company, SystemRole::AccountsReceivable)?;
    let description = format!("Verkoopfactuur {}", invoice.invoice_number);
    let mut builder = JournalBuilder::new(EntryType::Sales, invoice.invoice_date, description.clone())
        .reference(invoice.invoice_number.clone())
        .contact(invoice.contact_id);

    builder.debit(receivable.id, invoice.total_amount, description.clone())?;
    for line in invoice.lines.iter().filter(|l| !l.amount.is_zero()) {
        builder.credit(line.account_id, line.amount, line.description.clone())?;
    }
    if !invoice.vat_amount.is_zero() {
        let vat_payable = system::resolve(&tx, company, SystemRole::VatPayable)?;
        builder.credit(vat_payable.id, invoice.vat_amount, format!("BTW {}", invoice.invoice_number))?;
    }

    let entry_id = write_entry(&tx, company, &builder.build()?)?;
    tx.execute(
        "UPDATE invoices SET journal_entry_id = ?1 WHERE company_id = ?2 AND id = ?3",
        params![entry_id, company, invoice.id],
    )?;
    tx.commit()?;

    log::info!(
        "Posting: sales invoice {} finalized as entry {} ({})",
        invoice.invoice_number,
        entry_id,
        invoice.total_amount
    );
    load_entry(conn, company, entry_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{account_id, count, seeded_connection, COMPANY};
    use crate::invoices::test_support::single_line_invoice;
    use crate::models::{InvoiceStatus, VatRate};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_finalize_sales_invoice() {
        let mut conn = seeded_connection();
        let invoice = single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "826.45", VatRate::Standard, Some(3));

        let entry = finalize_sales_invoice(&mut conn, COMPANY, invoice.id).unwrap();
        assert!(entry.is_balanced());
        assert_eq!(entry.entry_type, EntryType::Sales);
        assert_eq!(entry.contact_id, Some(3));
        assert_eq!(entry.lines.len(), 3);

        assert_eq!(entry.lines[0].account_id, account_id(&conn, "1300"));
        assert_eq!(entry.lines[0].debit, dec("1000.00"));
        assert_eq!(entry.lines[1].account_id, account_id(&conn, "8000"));
        assert_eq!(entry.lines[1].credit, dec("826.45"));
        assert_eq!(entry.lines[2].account_id, account_id(&conn, "1700"));
        assert_eq!(entry.lines[2].credit, dec("173.55"));

        let posted = invoices::get_invoice(&conn, COMPANY, invoice.id).unwrap();
        assert_eq!(posted.status, InvoiceStatus::Sent);
        assert_eq!(posted.journal_entry_id, Some(entry.id));
    }

    #[test]
    fn test_finalize_twice_is_already_posted() {
        let mut conn = seeded_connection();
        let invoice = single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "100", VatRate::Standard, Some(3));
        finalize_sales_invoice(&mut conn, COMPANY, invoice.id).unwrap();
        assert!(matches!(
            finalize_sales_invoice(&mut conn, COMPANY, invoice.id),
            Err(LedgerError::AlreadyPosted(_))
        ));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM journal_entries"), 1);
    }

    #[test]
    fn test_zero_vat_invoice_has_no_vat_line() {
        let mut conn = seeded_connection();
        let invoice = single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "250", VatRate::Zero, Some(3));
        let entry = finalize_sales_invoice(&mut conn, COMPANY, invoice.id).unwrap();
        assert_eq!(entry.lines.len(), 2);
    }

    #[test]
    fn test_failure_rolls_back_status() {
        let mut conn = seeded_connection();
        // no customer
        let invoice = single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "100", VatRate::Standard, None);
        assert!(matches!(
            finalize_sales_invoice(&mut conn, COMPANY, invoice.id),
            Err(LedgerError::Validation(_))
        ));
        let still = invoices::get_invoice(&conn, COMPANY, invoice.id).unwrap();
        assert_eq!(still.status, InvoiceStatus::Draft);

        // missing VAT account
        let with_contact =
            single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "100", VatRate::Standard, Some(3));
        let vat = account_id(&conn, "1700");
        conn.execute("UPDATE accounts SET is_active = 0 WHERE id = ?1", [vat]).unwrap();
        assert!(matches!(
            finalize_sales_invoice(&mut conn, COMPANY, with_contact.id),
            Err(LedgerError::SystemAccountNotFound(SystemRole::VatPayable))
        ));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM journal_entries"), 0);
        assert_eq!(
            invoices::get_invoice(&conn, COMPANY, with_contact.id).unwrap().status,
            InvoiceStatus::Draft
        );
    }

    #[test]
    fn test_purchase_invoice_is_not_finalized_as_sales() {
        let mut conn = seeded_connection();
        let invoice = single_line_invoice(&mut conn, InvoiceDirection::Purchase, "4000", "100", VatRate::Standard, None);
        assert!(matches!(
            finalize_sales_invoice(&mut conn, COMPANY, invoice.id),
            Err(LedgerError::Validation(_))
        ));
    }
}
