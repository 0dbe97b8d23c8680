//! MT940 (SWIFT customer statement) parser.
//!
//! Handles the Dutch bank dialects: structured `:86:` fields
//! (`/NAME/.../REMI/...`, ING and Rabobank) as well as free text.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use super::{clean_text, decode_text, parse_amount, ParseOutcome, RawTransaction, StatementFormat, StatementParser};
use crate::error::Result;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:(\d{2}[A-Z]?):(.*)$").expect("valid tag regex"));

// :61: value date, optional entry date, D/C mark, funds code, amount, rest
static STATEMENT_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{6})(\d{4})?(RC|RD|C|D)([A-Z])?(\d+(?:,\d*)?)(.*)$")
        .expect("valid :61: regex")
});

const INFO_KEYS: &[&str] = &[
    "TRTP", "IBAN", "BIC", "NAME", "REMI", "EREF", "ORDP", "BENM", "ADDR", "MARF", "CSID",
    "CNTP", "PREF", "RTRN", "SVCL", "ULTC", "ULTD", "PURP",
];

pub struct Mt940Parser;

impl StatementParser for Mt940Parser {
    fn format(&self) -> StatementFormat {
        StatementFormat::Mt940
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        Ok(parse_text(&decode_text(bytes)))
    }
}

/// A `:61:` line with the `:86:` text that follows it
struct PendingEntry {
    line_no: usize,
    statement_line: String,
    supplementary: Vec<String>,
    info: Vec<String>,
}

pub fn parse_text(text: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::new(StatementFormat::Mt940);
    let mut current: Option<PendingEntry> = None;
    let mut in_info = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end_matches('\r').trim();
        if line.is_empty() || line == "-" || line == "-}" || line.starts_with('{') {
            continue;
        }

        let Some(caps) = TAG_RE.captures(line) else {
            // Continuation of the previous field
            if let Some(entry) = current.as_mut() {
                if in_info {
                    entry.info.push(line.to_string());
                } else {
                    entry.supplementary.push(line.to_string());
                }
            }
            continue;
        };

        let tag = caps.get(1).map_or("", |m| m.as_str());
        let value = caps.get(2).map_or("", |m| m.as_str());

        if tag == "86" {
            if let Some(entry) = current.as_mut() {
                entry.info.push(value.to_string());
                in_info = true;
            }
            continue;
        }

        // Any other tag closes the running entry
        if let Some(entry) = current.take() {
            finish_entry(entry, &mut outcome);
        }
        in_info = false;

        match tag {
            "61" => {
                current = Some(PendingEntry {
                    line_no,
                    statement_line: value.to_string(),
                    supplementary: Vec::new(),
                    info: Vec::new(),
                });
            }
            "25" => {
                outcome.source = Some(format!("MT940 {}", value.trim()));
            }
            "60F" | "60M" | "62F" | "62M" | "64" | "65" => {
                outcome.skip(format!("line {}: balance line :{}:", line_no, tag));
            }
            _ => {}
        }
    }

    if let Some(entry) = current.take() {
        finish_entry(entry, &mut outcome);
    }

    outcome
}

fn finish_entry(entry: PendingEntry, outcome: &mut ParseOutcome) {
    let Some(caps) = STATEMENT_LINE_RE.captures(&entry.statement_line) else {
        outcome.skip(format!(
            "line {}: malformed :61: statement line '{}'",
            entry.line_no, entry.statement_line
        ));
        return;
    };

    let Some(value_date) = parse_yymmdd(&caps[1]) else {
        outcome.skip(format!("line {}: invalid value date '{}'", entry.line_no, &caps[1]));
        return;
    };
    let date = caps
        .get(2)
        .and_then(|m| entry_date(value_date, m.as_str()))
        .unwrap_or(value_date);

    let Some(magnitude) = parse_amount(&caps[5]) else {
        outcome.skip(format!("line {}: invalid amount '{}'", entry.line_no, &caps[5]));
        return;
    };
    // Reversal of a debit is money in, reversal of a credit is money out
    let amount: Decimal = match &caps[3] {
        "C" | "RD" => magnitude,
        _ => -magnitude,
    };

    let reference = caps.get(6).and_then(|m| customer_reference(m.as_str()));
    let info = InfoFields::parse(&entry.info);

    let mut description = info.description();
    if description.is_empty() {
        description = clean_text(&entry.supplementary.join(" "));
    }
    if description.is_empty() {
        description = reference.clone().unwrap_or_default();
    }

    let mut txn = RawTransaction::new(date, amount, description);
    txn.counterparty_name = info.name;
    txn.counterparty_iban = info.iban;
    txn.reference = info.end_to_end.or(reference);
    outcome.transactions.push(txn);
}

fn parse_yymmdd(s: &str) -> Option<NaiveDate> {
    let yy: i32 = s.get(0..2)?.parse().ok()?;
    let month: u32 = s.get(2..4)?.parse().ok()?;
    let day: u32 = s.get(4..6)?.parse().ok()?;
    let year = if yy < 80 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Booking date (MMDD) next to a value date; may cross a year boundary
fn entry_date(value_date: NaiveDate, mmdd: &str) -> Option<NaiveDate> {
    let month: u32 = mmdd.get(0..2)?.parse().ok()?;
    let day: u32 = mmdd.get(2..4)?.parse().ok()?;
    let year = match (value_date.month(), month) {
        (1, 12) => value_date.year() - 1,
        (12, 1) => value_date.year() + 1,
        _ => value_date.year(),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `N` + 3-char type code + customer reference [`//` bank reference]
fn customer_reference(rest: &str) -> Option<String> {
    let rest = rest.trim();
    let body = rest.get(4..).filter(|_| rest.starts_with(&['N', 'F', 'S'][..]))?;
    let customer = body.split("//").next().unwrap_or("").trim();
    if customer.is_empty() || customer.eq_ignore_ascii_case("NONREF") {
        None
    } else {
        Some(customer.to_string())
    }
}

#[derive(Debug, Default)]
struct InfoFields {
    structured: bool,
    raw: String,
    transaction_type: Option<String>,
    name: Option<String>,
    iban: Option<String>,
    remittance: Option<String>,
    end_to_end: Option<String>,
}

impl InfoFields {
    fn parse(lines: &[String]) -> Self {
        let joined_tight = lines.concat();
        let trimmed = joined_tight.trim();
        if !trimmed.starts_with('/') {
            return Self {
                raw: clean_text(&lines.join(" ")),
                ..Self::default()
            };
        }

        let mut fields = Self {
            structured: true,
            raw: clean_text(trimmed),
            ..Self::default()
        };
        let mut key: Option<&str> = None;
        let mut value: Vec<&str> = Vec::new();

        for token in trimmed.split('/') {
            if let Some(next_key) = INFO_KEYS.iter().find(|k| **k == token) {
                if let Some(k) = key.take() {
                    fields.assign(k, &value.join("/"));
                }
                key = Some(*next_key);
                value.clear();
            } else if key.is_some() {
                value.push(token);
            }
        }
        if let Some(k) = key {
            fields.assign(k, &value.join("/"));
        }
        fields
    }

    fn assign(&mut self, key: &str, value: &str) {
        let value = clean_text(value.trim_matches('/'));
        if value.is_empty() {
            return;
        }
        match key {
            "TRTP" => self.transaction_type = Some(value),
            "IBAN" => self.iban = Some(value.replace(' ', "")),
            "NAME" => self.name = Some(value),
            "REMI" => {
                let text = value
                    .strip_prefix("USTD//")
                    .or_else(|| value.strip_prefix("USTD/"))
                    .unwrap_or(&value);
                self.remittance = Some(clean_text(text.trim_matches('/')));
            }
            "EREF" if !value.eq_ignore_ascii_case("NOTPROVIDED") => self.end_to_end = Some(value),
            _ => {}
        }
    }

    fn description(&self) -> String {
        if !self.structured {
            return self.raw.clone();
        }
        let parts: Vec<&str> = [self.name.as_deref(), self.remittance.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        if !parts.is_empty() {
            return parts.join(" ");
        }
        self.transaction_type.clone().unwrap_or_else(|| self.raw.clone())
    }
}

/// Five-transaction ING export used across the import tests
#[cfg(test)]
pub(crate) const ING_SAMPLE: &str = "\
{1:F01INGBNL2ABXXX0000000000}
:20:P240131000000001
:25:NL69INGB0123456789EUR
:28C:00000
:60F:C240101EUR1000,00
:61:2401020102D12,50NTRFNONREF//2401021234
:86:/TRTP/SEPA OVERBOEKING/IBAN/NL80RABO0123456789/BIC/RABONL2U/NAME/
KPN B.V./REMI/USTD//Factuur 2024-001 internet/EREF/NOTPROVIDED
:61:2401030103C1500,00NTRFFACT-17//2401031111
:86:/TRTP/SEPA OVERBOEKING/IBAN/NL91ABNA0417164300/NAME/Klant BV/REMI/U
STD//Betaling factuur 17/EREF/E2E-17
:61:2401040104D45,99NTRFNONREF
:86:Albert Heijn 1234 AMSTERDAM
:61:2401050105D9,99NTRFNONREF
:86:Spotify AB
:61:2401060106RD3,00NTRFNONREF
:86:Terugboeking kosten
:62F:C240106EUR2434,52
-}";

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_ing_statement() {
        let outcome = parse_text(ING_SAMPLE);
        assert_eq!(outcome.transactions.len(), 5);
        // :60F: and :62F:
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.source.as_deref(), Some("MT940 NL69INGB0123456789EUR"));

        let first = &outcome.transactions[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(first.amount, Decimal::from_str("-12.50").unwrap());
        assert_eq!(first.description, "KPN B.V. Factuur 2024-001 internet");
        assert_eq!(first.counterparty_iban.as_deref(), Some("NL80RABO0123456789"));
        assert_eq!(first.reference, None);

        let second = &outcome.transactions[1];
        assert_eq!(second.amount, Decimal::from_str("1500.00").unwrap());
        assert_eq!(second.counterparty_name.as_deref(), Some("Klant BV"));
        assert_eq!(second.description, "Klant BV Betaling factuur 17");
        assert_eq!(second.reference.as_deref(), Some("E2E-17"));

        assert_eq!(outcome.transactions[2].description, "Albert Heijn 1234 AMSTERDAM");
        // RD: reversal of a debit is money in
        assert_eq!(outcome.transactions[4].amount, Decimal::from_str("3.00").unwrap());
    }

    #[test]
    fn test_malformed_statement_line_is_skipped() {
        let text = ":25:NL69INGB0123456789\n:61:garbage\n:86:x\n:61:2402010201C10,00NTRFNONREF\n:86:Rente";
        let outcome = parse_text(text);
        assert_eq!(outcome.transactions.len(), 1);
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.warnings[0].contains("malformed"));
    }

    #[test]
    fn test_entry_date_across_year_boundary() {
        let value_date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(
            entry_date(value_date, "1231"),
            NaiveDate::from_ymd_opt(2023, 12, 31)
        );
    }

    #[test]
    fn test_customer_reference() {
        assert_eq!(customer_reference("NTRFFACT-17//2401031111"), Some("FACT-17".to_string()));
        assert_eq!(customer_reference("NTRFNONREF"), None);
    }
}
