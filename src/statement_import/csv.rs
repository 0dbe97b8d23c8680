//! CSV statement parser.
//!
//! Finds the header row, attributes it to a known bank template when the
//! headers match, and falls back to a keyword-based column mapping.

use ::csv::{ReaderBuilder, StringRecord, Trim};
use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::csv_templates::{self, column_index, BankTemplate};
use super::{clean_text, decode_text, parse_amount, parse_date, ParseOutcome, RawTransaction, StatementFormat, StatementParser};
use crate::error::{LedgerError, Result};

/// Records inspected for a header row before giving up
const HEADER_SEARCH_LIMIT: usize = 10;

const GENERIC_DATE: &[&str] = &["datum", "date", "boekdatum", "transactiedatum", "booking date", "valutadatum"];
const GENERIC_AMOUNT: &[&str] = &["bedrag", "amount", "bedrag (eur)", "amount (eur)", "value"];
const GENERIC_DESCRIPTION: &[&str] = &["omschrijving", "description", "mededelingen", "naam / omschrijving", "memo"];
const GENERIC_NAME: &[&str] = &["naam tegenpartij", "tegenrekeninghouder", "counterparty name", "naam", "name"];
const GENERIC_IBAN: &[&str] = &["tegenrekening", "tegenrekening iban/bban", "counterparty iban", "iban tegenpartij"];
const GENERIC_SIGN: &[&str] = &["af bij", "af/bij", "creditdebet", "credit/debit", "debit/credit"];
const GENERIC_DEBIT_MARKERS: &[&str] = &["af", "d", "debit", "debet", "dr"];

#[derive(Default)]
pub struct CsvParser {
    /// Forced template; auto-detected when absent
    template: Option<&'static BankTemplate>,
}

impl CsvParser {
    pub fn with_template(id: &str) -> Result<Self> {
        let template = csv_templates::get_template(id)
            .ok_or_else(|| LedgerError::UnsupportedFormat(format!("unknown CSV template '{}'", id)))?;
        Ok(Self {
            template: Some(template),
        })
    }
}

impl StatementParser for CsvParser {
    fn format(&self) -> StatementFormat {
        StatementFormat::Csv
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        parse_csv_text(&decode_text(bytes), self.template)
    }
}

/// Detect delimiter from the header line
pub fn detect_delimiter(line: &str) -> char {
    let semicolons = line.matches(';').count();
    let commas = line.matches(',').count();
    let tabs = line.matches('\t').count();

    if semicolons >= commas && semicolons >= tabs {
        ';'
    } else if tabs >= commas {
        '\t'
    } else {
        ','
    }
}

/// Resolved column positions for one file
#[derive(Debug)]
struct ColumnMapping {
    source: String,
    date: usize,
    amount: usize,
    description: Vec<usize>,
    counterparty_name: Option<usize>,
    counterparty_iban: Option<usize>,
    reference: Option<usize>,
    sign: Option<(usize, &'static [&'static str])>,
    date_format: Option<&'static str>,
    decimal_separator: Option<char>,
}

fn find_generic(headers: &[String], keys: &[&str]) -> Option<usize> {
    let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    keys.iter()
        .find_map(|key| lowered.iter().position(|h| h == key))
        .or_else(|| keys.iter().find_map(|key| lowered.iter().position(|h| h.contains(key))))
}

impl ColumnMapping {
    fn from_template(template: &'static BankTemplate, headers: &[String]) -> Option<Self> {
        let date = column_index(headers, template.date_column)?;
        let amount = column_index(headers, template.amount_column)?;
        let sign = match template.sign {
            Some(sign) => Some((column_index(headers, sign.header)?, sign.debit_markers)),
            None => None,
        };
        Some(Self {
            source: template.name.to_string(),
            date,
            amount,
            description: template
                .description_columns
                .iter()
                .filter_map(|name| column_index(headers, name))
                .collect(),
            counterparty_name: template.counterparty_name_column.and_then(|c| column_index(headers, c)),
            counterparty_iban: template.counterparty_iban_column.and_then(|c| column_index(headers, c)),
            reference: template.reference_column.and_then(|c| column_index(headers, c)),
            sign,
            date_format: Some(template.date_format),
            decimal_separator: Some(template.decimal_separator),
        })
    }

    fn generic(headers: &[String]) -> Option<Self> {
        let date = find_generic(headers, GENERIC_DATE)?;
        let amount = find_generic(headers, GENERIC_AMOUNT)?;
        // A data row whose "date" cell parses is not a header
        if parse_date(&headers[date]).is_some() {
            return None;
        }
        let counterparty_name = find_generic(headers, GENERIC_NAME);
        let mut description = Vec::new();
        if let Some(name) = counterparty_name {
            description.push(name);
        }
        if let Some(desc) = find_generic(headers, GENERIC_DESCRIPTION) {
            if !description.contains(&desc) {
                description.push(desc);
            }
        }
        Some(Self {
            source: "CSV (generic)".to_string(),
            date,
            amount,
            description,
            counterparty_name,
            counterparty_iban: find_generic(headers, GENERIC_IBAN).filter(|i| Some(*i) != counterparty_name),
            reference: None,
            sign: find_generic(headers, GENERIC_SIGN).map(|i| (i, GENERIC_DEBIT_MARKERS)),
            date_format: None,
            decimal_separator: None,
        })
    }

    fn detect(headers: &[String], forced: Option<&'static BankTemplate>) -> Option<Self> {
        if let Some(template) = forced {
            return Self::from_template(template, headers);
        }
        let detection = csv_templates::detect_bank(headers);
        detection
            .template_id
            .as_deref()
            .and_then(csv_templates::get_template)
            .and_then(|template| Self::from_template(template, headers))
            .or_else(|| Self::generic(headers))
    }

    fn parse_amount(&self, raw: &str) -> Option<Decimal> {
        match self.decimal_separator {
            Some(',') => parse_amount(&raw.replace('.', "")),
            Some('.') => parse_amount(&raw.replace(',', "")),
            _ => parse_amount(raw),
        }
    }

    fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        self.date_format
            .and_then(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
            .or_else(|| parse_date(raw))
    }

    fn to_transaction(&self, record: &StringRecord) -> std::result::Result<RawTransaction, String> {
        let cell = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
        let optional = |idx: Option<usize>| {
            idx.map(cell)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let date_raw = cell(self.date);
        let date = self
            .parse_date(date_raw)
            .ok_or_else(|| format!("invalid date '{}'", date_raw))?;

        let amount_raw = cell(self.amount);
        let mut amount = self
            .parse_amount(amount_raw)
            .ok_or_else(|| format!("invalid amount '{}'", amount_raw))?;

        if let Some((idx, debit_markers)) = self.sign {
            let marker = cell(idx);
            if debit_markers.iter().any(|m| m.eq_ignore_ascii_case(marker)) {
                amount = -amount.abs();
            } else if !marker.is_empty() {
                amount = amount.abs();
            }
        }

        let counterparty_name = optional(self.counterparty_name);
        let joined: Vec<&str> = self
            .description
            .iter()
            .map(|&idx| cell(idx))
            .filter(|v| !v.is_empty())
            .collect();
        let mut description = clean_text(&joined.join(" "));
        if description.is_empty() {
            description = counterparty_name.clone().unwrap_or_default();
        }

        let mut txn = RawTransaction::new(date, amount, description);
        txn.counterparty_name = counterparty_name;
        txn.counterparty_iban = optional(self.counterparty_iban).map(|i| i.replace(' ', ""));
        txn.reference = optional(self.reference);
        Ok(txn)
    }
}

pub fn parse_csv_text(text: &str, forced: Option<&'static BankTemplate>) -> Result<ParseOutcome> {
    let mut outcome = ParseOutcome::new(StatementFormat::Csv);
    let Some(first_line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return Ok(outcome);
    };
    let delimiter = detect_delimiter(first_line);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut mapping: Option<ColumnMapping> = None;
    let mut inspected = 0usize;

    for (index, result) in reader.records().enumerate() {
        let line = index + 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                if mapping.is_some() {
                    outcome.skip(format!("row {}: {}", line, e));
                }
                continue;
            }
        };
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        if mapping.is_none() {
            inspected += 1;
            let headers: Vec<String> = record.iter().map(str::to_string).collect();
            if let Some(found) = ColumnMapping::detect(&headers, forced) {
                log::debug!("Statement Import: CSV header on line {} mapped as {}", line, found.source);
                outcome.source = Some(found.source.clone());
                mapping = Some(found);
            } else if inspected >= HEADER_SEARCH_LIMIT {
                break;
            }
            continue;
        }
        let Some(columns) = mapping.as_ref() else {
            continue;
        };

        match columns.to_transaction(&record) {
            Ok(txn) => outcome.transactions.push(txn),
            Err(message) => outcome.skip(format!("row {}: {}", line, message)),
        }
    }

    if mapping.is_none() {
        return Err(LedgerError::Parse(
            "CSV file has no recognizable header row (need a date and an amount column)".to_string(),
        ));
    }
    Ok(outcome)
}
