//! Sales and purchase invoices.
//!
//! Line amounts and VAT are always derived here from quantity, unit price and
//! rate; callers never supply totals. Posting re-derives them once more
//! before a single cent reaches the journal.

pub mod intake;

use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::accounts;
use crate::error::{LedgerError, Result};
use crate::models::{round_money, to_cents, CompanyId, Invoice, InvoiceDirection, InvoiceLine, InvoiceStatus, VatRate};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoiceLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: VatRate,
    pub account_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    pub direction: InvoiceDirection,
    /// Generated as `YYYY-NNNN` when absent
    pub invoice_number: Option<String>,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub contact_id: Option<i64>,
    pub lines: Vec<NewInvoiceLine>,
}

/// Net amount and VAT of one line, both in cents precision
pub fn line_amounts(quantity: Decimal, unit_price: Decimal, vat_rate: VatRate) -> (Decimal, Decimal) {
    let net = round_money(quantity * unit_price);
    (net, vat_rate.vat_on(net))
}

/// Next free number for the year, `2024-0001` style
pub fn next_invoice_number(
    conn: &Connection,
    company: CompanyId,
    direction: InvoiceDirection,
    year: i32,
) -> Result<String> {
    let prefix = format!("{}-", year);
    let mut stmt = conn.prepare(
        "SELECT invoice_number FROM invoices
         WHERE company_id = ?1 AND direction = ?2 AND invoice_number LIKE ?3",
    )?;
    let highest = stmt
        .query_map(params![company, direction, format!("{}%", prefix)], |row| {
            row.get::<_, String>(0)
        })?
        .filter_map(|number| number.ok())
        .filter_map(|number| number.strip_prefix(&prefix).and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0);
    Ok(format!("{}{:04}", prefix, highest + 1))
}

pub fn create_invoice(conn: &mut Connection, company: CompanyId, data: &NewInvoice) -> Result<Invoice> {
    if data.lines.is_empty() {
        return Err(LedgerError::validation("An invoice needs at least one line"));
    }
    if let Some(due) = data.due_date {
        if due < data.invoice_date {
            return Err(LedgerError::validation("Due date lies before the invoice date"));
        }
    }

    let tx = conn.transaction()?;

    for line in &data.lines {
        if line.description.trim().is_empty() {
            return Err(LedgerError::validation("Every invoice line needs a description"));
        }
        accounts::require_active(&tx, company, line.account_id)?;
    }

    let invoice_number = match data.invoice_number.as_deref().map(str::trim) {
        Some(number) if !number.is_empty() => number.to_string(),
        _ => next_invoice_number(&tx, company, data.direction, data.invoice_date.year())?,
    };
    let taken: bool = tx
        .query_row(
            "SELECT 1 FROM invoices WHERE company_id = ?1 AND direction = ?2 AND invoice_number = ?3",
            params![company, data.direction, invoice_number],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    if taken {
        return Err(LedgerError::validation(format!(
            "{} invoice {} already exists",
            data.direction, invoice_number
        )));
    }

    let computed: Vec<(Decimal, Decimal)> = data
        .lines
        .iter()
        .map(|l| line_amounts(l.quantity, l.unit_price, l.vat_rate))
        .collect();
    let subtotal: Decimal = computed.iter().map(|(net, _)| *net).sum();
    let vat_amount: Decimal = computed.iter().map(|(_, vat)| *vat).sum();
    let total = subtotal + vat_amount;

    tx.execute(
        "INSERT INTO invoices (company_id, direction, invoice_number, invoice_date, due_date, contact_id,
                               subtotal, vat_amount, total_amount, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'DRAFT')",
        params![
            company,
            data.direction,
            invoice_number,
            data.invoice_date,
            data.due_date,
            data.contact_id,
            to_cents(subtotal)?,
            to_cents(vat_amount)?,
            to_cents(total)?
        ],
    )?;
    let invoice_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO invoice_lines (invoice_id, position, description, quantity, unit_price,
                                        vat_rate, account_id, amount, vat_amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for (position, (line, (net, vat))) in data.lines.iter().zip(&computed).enumerate() {
            stmt.execute(params![
                invoice_id,
                position as i64,
                line.description.trim(),
                line.quantity.normalize().to_string(),
                line.unit_price.normalize().to_string(),
                line.vat_rate,
                line.account_id,
                to_cents(*net)?,
                to_cents(*vat)?
            ])?;
        }
    }
    tx.commit()?;

    log::info!(
        "Created {} invoice {} ({} incl. {} VAT)",
        data.direction,
        invoice_number,
        total,
        vat_amount
    );
    get_invoice(conn, company, invoice_id)
}

pub fn get_invoice(conn: &Connection, company: CompanyId, invoice_id: i64) -> Result<Invoice> {
    let sql = format!(
        "SELECT {} FROM invoices WHERE company_id = ?1 AND id = ?2",
        Invoice::COLUMNS
    );
    let mut invoice = conn
        .query_row(&sql, params![company, invoice_id], Invoice::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("Invoice", invoice_id))?;

    let sql = format!(
        "SELECT {} FROM invoice_lines WHERE invoice_id = ?1 ORDER BY position",
        InvoiceLine::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    invoice.lines = stmt
        .query_map([invoice_id], InvoiceLine::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(invoice)
}

pub fn list_invoices(
    conn: &Connection,
    company: CompanyId,
    direction: Option<InvoiceDirection>,
    status: Option<InvoiceStatus>,
) -> Result<Vec<Invoice>> {
    let sql = format!(
        "SELECT {} FROM invoices
         WHERE company_id = ?1 AND (?2 IS NULL OR direction = ?2) AND (?3 IS NULL OR status = ?3)
         ORDER BY invoice_date, id",
        Invoice::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let invoices = stmt
        .query_map(params![company, direction, status], Invoice::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(invoices)
}

/// Re-derive every amount before the invoice is posted
pub fn validate_for_posting(invoice: &Invoice, require_contact: bool) -> Result<()> {
    if invoice.lines.is_empty() {
        return Err(LedgerError::validation(format!(
            "Invoice {} has no lines",
            invoice.invoice_number
        )));
    }
    if require_contact && invoice.contact_id.is_none() {
        return Err(LedgerError::validation(format!(
            "Invoice {} has no customer",
            invoice.invoice_number
        )));
    }

    for line in &invoice.lines {
        let (net, vat) = line_amounts(line.quantity, line.unit_price, line.vat_rate);
        if net != line.amount || vat != line.vat_amount {
            return Err(LedgerError::validation(format!(
                "Invoice {} line {}: stored amounts {} / {} differ from computed {} / {}",
                invoice.invoice_number,
                line.position + 1,
                line.amount,
                line.vat_amount,
                net,
                vat
            )));
        }
    }

    let subtotal: Decimal = invoice.lines.iter().map(|l| l.amount).sum();
    let vat_amount: Decimal = invoice.lines.iter().map(|l| l.vat_amount).sum();
    if subtotal != invoice.subtotal || vat_amount != invoice.vat_amount {
        return Err(LedgerError::validation(format!(
            "Invoice {} header ({} / {}) does not match its lines ({} / {})",
            invoice.invoice_number, invoice.subtotal, invoice.vat_amount, subtotal, vat_amount
        )));
    }
    if invoice.subtotal + invoice.vat_amount != invoice.total_amount {
        return Err(LedgerError::validation(format!(
            "Invoice {}: subtotal {} + VAT {} != total {}",
            invoice.invoice_number, invoice.subtotal, invoice.vat_amount, invoice.total_amount
        )));
    }
    Ok(())
}

/// Record payment of a posted invoice
pub fn mark_invoice_paid(conn: &Connection, company: CompanyId, invoice_id: i64) -> Result<Invoice> {
    let changed = conn.execute(
        "UPDATE invoices SET status = 'PAID' WHERE company_id = ?1 AND id = ?2 AND status = 'SENT'",
        params![company, invoice_id],
    )?;
    if changed == 0 {
        let invoice = get_invoice(conn, company, invoice_id)?;
        return Err(match invoice.status {
            InvoiceStatus::Paid => LedgerError::AlreadyPosted(format!(
                "invoice {} is already paid",
                invoice.invoice_number
            )),
            _ => LedgerError::validation(format!(
                "Invoice {} must be posted before it can be paid",
                invoice.invoice_number
            )),
        });
    }
    get_invoice(conn, company, invoice_id)
}

/// Remove an invoice that was never posted
pub fn delete_draft_invoice(conn: &Connection, company: CompanyId, invoice_id: i64) -> Result<()> {
    let invoice = get_invoice(conn, company, invoice_id)?;
    if invoice.status != InvoiceStatus::Draft {
        return Err(LedgerError::validation(format!(
            "Invoice {} is posted; reverse its journal entry instead",
            invoice.invoice_number
        )));
    }
    conn.execute(
        "DELETE FROM invoices WHERE company_id = ?1 AND id = ?2 AND status = 'DRAFT'",
        params![company, invoice_id],
    )?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::single_line_invoice;
    use super::*;
    use crate::db::test_support::{account_id, seeded_connection, COMPANY};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_line_amounts_round_per_line() {
        let (net, vat) = line_amounts(dec("3"), dec("33.333"), VatRate::Standard);
        assert_eq!(net, dec("100.00"));
        assert_eq!(vat, dec("21.00"));
        let (net, vat) = line_amounts(dec("1.5"), dec("10.25"), VatRate::Reduced);
        assert_eq!(net, dec("15.38"));
        assert_eq!(vat, dec("1.38"));
    }

    #[test]
    fn test_create_invoice_computes_totals_and_numbers() {
        let mut conn = seeded_connection();
        let first = single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "826.45", VatRate::Standard, Some(7));
        assert_eq!(first.invoice_number, "2024-0001");
        assert_eq!(first.subtotal, dec("826.45"));
        assert_eq!(first.vat_amount, dec("173.55"));
        assert_eq!(first.total_amount, dec("1000.00"));
        assert_eq!(first.status, InvoiceStatus::Draft);
        assert_eq!(first.lines.len(), 1);
        assert_eq!(first.lines[0].unit_price, dec("826.45"));

        let second = single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "10", VatRate::Zero, Some(7));
        assert_eq!(second.invoice_number, "2024-0002");
        // purchase numbering is separate
        let purchase = single_line_invoice(&mut conn, InvoiceDirection::Purchase, "4000", "10", VatRate::Zero, None);
        assert_eq!(purchase.invoice_number, "2024-0001");
        validate_for_posting(&first, true).unwrap();
    }

    #[test]
    fn test_create_invoice_rejects_bad_input() {
        let mut conn = seeded_connection();
        let omzet = account_id(&conn, "8000");
        let mut data = NewInvoice {
            direction: InvoiceDirection::Sales,
            invoice_number: Some("A-1".to_string()),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            due_date: None,
            contact_id: Some(1),
            lines: vec![],
        };
        assert!(matches!(create_invoice(&mut conn, COMPANY, &data), Err(LedgerError::Validation(_))));

        data.lines.push(NewInvoiceLine {
            description: "Advies".to_string(),
            quantity: Decimal::ONE,
            unit_price: dec("100"),
            vat_rate: VatRate::Standard,
            account_id: omzet,
        });
        create_invoice(&mut conn, COMPANY, &data).unwrap();
        // duplicate number
        assert!(matches!(create_invoice(&mut conn, COMPANY, &data), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_validate_detects_tampered_totals() {
        let mut conn = seeded_connection();
        let mut invoice = single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "100", VatRate::Standard, None);
        assert!(validate_for_posting(&invoice, true).is_err());
        validate_for_posting(&invoice, false).unwrap();

        invoice.total_amount = dec("120.00");
        assert!(matches!(validate_for_posting(&invoice, false), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_mark_paid_and_delete_draft() {
        let mut conn = seeded_connection();
        let invoice = single_line_invoice(&mut conn, InvoiceDirection::Sales, "8000", "100", VatRate::Standard, Some(1));
        assert!(matches!(
            mark_invoice_paid(&conn, COMPANY, invoice.id),
            Err(LedgerError::Validation(_))
        ));
        delete_draft_invoice(&conn, COMPANY, invoice.id).unwrap();
        assert!(matches!(
            get_invoice(&conn, COMPANY, invoice.id),
            Err(LedgerError::NotFound { .. })
        ));
    }
}
