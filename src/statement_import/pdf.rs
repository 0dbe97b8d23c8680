//! PDF statement parser.
//!
//! Works on the extracted text layer: one transaction per line with a
//! leading date and a trailing amount, optionally followed by Af/Bij.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{clean_text, parse_amount, parse_date, ParseOutcome, RawTransaction, StatementFormat, StatementParser};
use crate::error::{LedgerError, Result};

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(\d{1,2}[-./]\d{1,2}[-./]\d{2,4}|\d{4}-\d{2}-\d{2})\s+(.+?)\s+([-+]?(?:\d{1,3}(?:[.,]\d{3})*|\d+)[.,]\d{2}-?)\s*(af|bij|d|c|debit|credit)?\s*$",
    )
    .expect("valid statement line regex")
});

static BALANCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(saldo|balance)").expect("valid balance regex"));

pub struct PdfParser;

impl StatementParser for PdfParser {
    fn format(&self) -> StatementFormat {
        StatementFormat::Pdf
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| LedgerError::Parse(format!("Failed to extract text from PDF: {}", e)))?;
        Ok(parse_pdf_text(&text))
    }
}

/// Dates as printed on statements, including two-digit years
fn parse_statement_date(raw: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.split(['-', '.', '/']).collect();
    if parts.len() == 3 && parts[0].len() <= 2 && parts[2].len() == 2 {
        return ["%d-%m-%y", "%d.%m.%y", "%d/%m/%y"]
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok());
    }
    parse_date(raw)
}

/// Parse already extracted statement text
pub fn parse_pdf_text(text: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::new(StatementFormat::Pdf);

    for (index, line) in text.lines().enumerate() {
        let Some(caps) = LINE_RE.captures(line) else {
            continue;
        };
        let line_no = index + 1;
        let description = clean_text(&caps[2]);

        if BALANCE_RE.is_match(&description) {
            outcome.skip(format!("line {}: balance line", line_no));
            continue;
        }

        let Some(date) = parse_statement_date(&caps[1]) else {
            outcome.skip(format!("line {}: invalid date '{}'", line_no, &caps[1]));
            continue;
        };
        let Some(mut amount) = parse_amount(&caps[3]) else {
            outcome.skip(format!("line {}: invalid amount '{}'", line_no, &caps[3]));
            continue;
        };

        match caps.get(4).map(|m| m.as_str().to_lowercase()).as_deref() {
            Some("af") | Some("d") | Some("debit") => amount = -amount.abs(),
            Some("bij") | Some("c") | Some("credit") => amount = amount.abs(),
            _ => {}
        }

        outcome.transactions.push(RawTransaction::new(date, amount, description));
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const STATEMENT: &str = "
Rekeningafschrift januari 2024
Datum      Omschrijving                       Bedrag
01-01-2024 Beginsaldo                        1.000,00
02-01-2024 KPN B.V. factuur 2024-001            12,50 Af
03-01-2024 Klant BV betaling factuur 17      1.500,00 Bij
04-01-24   Albert Heijn 1234                   -23,10
31-01-2024 Eindsaldo                         2.464,40
Pagina 1 van 1
";

    #[test]
    fn test_parse_pdf_text() {
        let outcome = parse_pdf_text(STATEMENT);
        assert_eq!(outcome.transactions.len(), 3);
        assert_eq!(outcome.skipped, 2);

        let first = &outcome.transactions[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(first.amount, Decimal::from_str("-12.50").unwrap());
        assert_eq!(first.description, "KPN B.V. factuur 2024-001");

        assert_eq!(outcome.transactions[1].amount, Decimal::from_str("1500.00").unwrap());
        assert_eq!(
            outcome.transactions[2].date,
            NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()
        );
        assert_eq!(outcome.transactions[2].amount, Decimal::from_str("-23.10").unwrap());
    }
}
