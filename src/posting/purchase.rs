//! Purchase invoice posting.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::{begin_posting, load_entry, write_entry, JournalBuilder};
use crate::accounts::system::{self, SystemRole};
use crate::error::{LedgerError, Result};
use crate::invoices;
use crate::models::{CompanyId, EntryType, InvoiceDirection, InvoiceStatus, JournalEntry};

/// How a purchase invoice is settled at booking time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "role")]
pub enum PaymentDisposition {
    /// Credit accounts payable; paid later through the bank
    Unpaid,
    /// Already paid from cash or from private means
    PaidVia(SystemRole),
}

impl PaymentDisposition {
    fn credit_role(self) -> Result<SystemRole> {
        match self {
            Self::Unpaid => Ok(SystemRole::AccountsPayable),
            Self::PaidVia(role @ (SystemRole::Cash | SystemRole::Private)) => Ok(role),
            Self::PaidVia(other) => Err(LedgerError::validation(format!(
                "{} is not a payment method; use CASH or PRIVATE",
                other
            ))),
        }
    }

    fn resulting_status(self) -> InvoiceStatus {
        match self {
            Self::Unpaid => InvoiceStatus::Sent,
            Self::PaidVia(_) => InvoiceStatus::Paid,
        }
    }
}

/// Book a Draft purchase invoice: Dr expense per line, Dr VAT receivable, Cr payables or payment account
pub fn book_purchase_invoice(
    conn: &mut Connection,
    company: CompanyId,
    invoice_id: i64,
    disposition: PaymentDisposition,
) -> Result<JournalEntry> {
    let credit_role = disposition.credit_role()?;
    let tx = begin_posting(conn)?;

    let invoice = invoices::get_invoice(&tx, company, invoice_id)?;
    if invoice.direction != InvoiceDirection::Purchase {
        return Err(LedgerError::validation(format!(
            "Invoice {} is not a purchase invoice",
            invoice.invoice_number
        )));
    }

    let new_status = disposition.resulting_status();
    let claimed = tx.execute(
        "UPDATE invoices SET status = ?1
         WHERE company_id = ?2 AND id = ?3 AND status = 'DRAFT'",
        params![new_status, company, invoice.id],
    )?;
    if claimed == 0 {
        return Err(LedgerError::AlreadyPosted(format!(
            "purchase invoice {} is already booked",
            invoice.invoice_number
        )));
    }

    invoices::validate_for_posting(&invoice, false)?;

    let description = format!("Inkoopfactuur {}", invoice.invoice_number);
    let mut builder = JournalBuilder::new(EntryType::Purchase, invoice.invoice_date, description.clone())
        .reference(invoice.invoice_number.clone())
        .contact(invoice.contact_id);

    for line in invoice.lines.iter().filter(|l| !l.amount.is_zero()) {
        builder.debit(line.account_id, line.amount, line.description.clone())?;
    }
    if !invoice.vat_amount.is_zero() {
        let vat_receivable = system::resolve(&tx, company, SystemRole::VatReceivable)?;
        builder.debit(vat_receivable.id, invoice.vat_amount, format!("BTW {}", invoice.invoice_number))?;
    }
    let counter = system::resolve(&tx, company, credit_role)?;
    builder.credit(counter.id, invoice.total_amount, description)?;

    let entry_id = write_entry(&tx, company, &builder.build()?)?;
    tx.execute(
        "UPDATE invoices SET journal_entry_id = ?1 WHERE company_id = ?2 AND id = ?3",
        params![entry_id, company, invoice.id],
    )?;
    tx.commit()?;

    log::info!(
        "Posting: purchase invoice {} booked as entry {} against {} ({})",
        invoice.invoice_number,
        entry_id,
        credit_role,
        invoice.total_amount
    );
    load_entry(conn, company, entry_id)
}
