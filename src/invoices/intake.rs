//! Purchase invoice intake from document extraction.
//!
//! The extraction result is untrusted input: amounts are re-checked and the
//! suggested account is resolved again against the chart before a Draft
//! purchase invoice is created.

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{create_invoice, NewInvoice, NewInvoiceLine};
use crate::accounts;
use crate::error::{LedgerError, Result};
use crate::models::{from_cents, round_money, to_cents, Account, AccountType, CompanyId, Invoice, InvoiceDirection, VatRate};
use crate::statement_import::parse_date;

/// Shape produced by the document extraction service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedInvoiceData {
    pub supplier_name: Option<String>,
    pub customer_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub net_amount: Option<Decimal>,
    pub vat_amount: Option<Decimal>,
    pub total_amount: Option<Decimal>,
    pub vat_rate: Option<i64>,
    pub suggested_account_id: Option<i64>,
    pub suggested_account_code: Option<String>,
    pub suggested_account_name: Option<String>,
    pub reasoning: Option<String>,
}

/// Find the suggested account again: by id first, then by code
fn resolve_suggested_account(conn: &Connection, company: CompanyId, data: &EnhancedInvoiceData) -> Result<Account> {
    let by_id = match data.suggested_account_id {
        Some(id) => match accounts::get_account(conn, company, id) {
            Ok(account) => Some(account),
            Err(LedgerError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        },
        None => None,
    };
    let account = match by_id {
        Some(account) => account,
        None => {
            let code = data
                .suggested_account_code
                .as_deref()
                .ok_or_else(|| LedgerError::validation("No usable account suggestion"))?;
            accounts::find_account_by_code(conn, company, code)?.ok_or_else(|| {
                LedgerError::validation(format!("Suggested account code '{}' does not exist", code))
            })?
        }
    };

    if !account.is_active {
        return Err(LedgerError::validation(format!(
            "Suggested account {} is inactive",
            account.label()
        )));
    }
    if !matches!(account.account_type, AccountType::Expense | AccountType::Asset) {
        return Err(LedgerError::validation(format!(
            "Suggested account {} is not an expense or asset account",
            account.label()
        )));
    }
    Ok(account)
}

fn parse_extracted_date(field: &str, raw: Option<&str>) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_date(s)
            .map(Some)
            .ok_or_else(|| LedgerError::validation(format!("Unreadable {} '{}'", field, s))),
        None => Ok(None),
    }
}

/// Split the net amount over the VAT tariffs, trusting the amounts over the stated rate.
///
/// A single tariff wins when one fits. Otherwise the net is split across 9%
/// and 21% so that the per-line VAT adds up to the cent.
fn split_by_vat_rate(net: Decimal, vat: Decimal, stated: Option<i64>) -> Result<Vec<(VatRate, Decimal)>> {
    let single = VatRate::from_percent(stated.unwrap_or(-1))
        .filter(|rate| rate.vat_on(net) == vat)
        .or_else(|| {
            [VatRate::Standard, VatRate::Reduced, VatRate::Zero]
                .into_iter()
                .find(|rate| rate.vat_on(net) == vat)
        });
    if let Some(rate) = single {
        return Ok(vec![(rate, net)]);
    }
    if let Some((reduced, standard)) = mixed_split(net, vat)? {
        return Ok(vec![(VatRate::Reduced, reduced), (VatRate::Standard, standard)]);
    }
    Err(LedgerError::validation(format!(
        "VAT {} on net {} matches no Dutch tariff (0, 9 or 21%) or 9/21% split",
        vat, net
    )))
}

/// Net at 9% and net at 21% whose rounded VAT sums to `vat`
fn mixed_split(net: Decimal, vat: Decimal) -> Result<Option<(Decimal, Decimal)>> {
    let net_cents = to_cents(net)?;
    // 0.09 * a + 0.21 * (net - a) = vat, off by at most a cent of rounding per line
    let estimate = to_cents((net * Decimal::new(21, 2) - vat) / Decimal::new(12, 2))?;
    for offset in 0..=MIXED_SPLIT_WINDOW {
        for candidate in [estimate - offset, estimate + offset] {
            if candidate <= 0 || candidate >= net_cents {
                continue;
            }
            let reduced = from_cents(candidate);
            let standard = net - reduced;
            if VatRate::Reduced.vat_on(reduced) + VatRate::Standard.vat_on(standard) == vat {
                return Ok(Some((reduced, standard)));
            }
        }
    }
    Ok(None)
}

const MIXED_SPLIT_WINDOW: i64 = 20;

/// Create a Draft purchase invoice from extracted data
pub fn draft_purchase_from_extraction(
    conn: &mut Connection,
    company: CompanyId,
    data: &EnhancedInvoiceData,
    contact_id: Option<i64>,
) -> Result<Invoice> {
    let (net, vat, total) = match (data.net_amount, data.vat_amount, data.total_amount) {
        (Some(net), Some(vat), Some(total)) => (round_money(net), round_money(vat), round_money(total)),
        _ => {
            return Err(LedgerError::validation(
                "Net, VAT and total amounts are all required",
            ))
        }
    };
    for amount in [net, vat, total] {
        to_cents(amount)?;
    }
    if net + vat != total {
        return Err(LedgerError::validation(format!(
            "Extracted amounts do not add up: {} + {} != {}",
            net, vat, total
        )));
    }
    if net <= Decimal::ZERO {
        return Err(LedgerError::validation("Extracted net amount must be positive"));
    }

    let account = resolve_suggested_account(conn, company, data)?;
    let split = split_by_vat_rate(net, vat, data.vat_rate)?;
    let invoice_date = parse_extracted_date("invoice date", data.invoice_date.as_deref())?
        .ok_or_else(|| LedgerError::validation("Invoice date is required"))?;
    let due_date = parse_extracted_date("due date", data.due_date.as_deref())?;

    let description = data
        .supplier_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|supplier| format!("Inkoop {}", supplier))
        .unwrap_or_else(|| format!("Inkoop {}", account.name));

    let invoice = create_invoice(
        conn,
        company,
        &NewInvoice {
            direction: InvoiceDirection::Purchase,
            invoice_number: data.invoice_number.clone(),
            invoice_date,
            due_date,
            contact_id,
            lines: split
                .iter()
                .map(|(vat_rate, line_net)| NewInvoiceLine {
                    description: if split.len() > 1 {
                        format!("{} ({}% btw)", description, vat_rate.percent())
                    } else {
                        description.clone()
                    },
                    quantity: Decimal::ONE,
                    unit_price: *line_net,
                    vat_rate: *vat_rate,
                    account_id: account.id,
                })
                .collect(),
        },
    )?;

    if let Some(reasoning) = &data.reasoning {
        log::debug!("Intake: account {} suggested because: {}", account.label(), reasoning);
    }
    log::info!(
        "Intake: drafted purchase invoice {} on {} ({})",
        invoice.invoice_number,
        account.label(),
        invoice.total_amount
    );
    Ok(invoice)
}
