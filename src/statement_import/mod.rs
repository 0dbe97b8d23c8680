//! Bank Statement Import Module
//!
//! Turns raw bank files (MT940, CAMT.053, CSV exports, PDF statements) into
//! a canonical stream of [`RawTransaction`]s. Money out is negative, money in
//! is positive, whatever the source format does.

pub mod camt053;
pub mod csv;
pub mod csv_templates;
pub mod mt940;
pub mod pdf;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{LedgerError, Result};

/// Canonical transaction produced by every parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<String>,
    pub reference: Option<String>,
}

impl RawTransaction {
    pub fn new(date: NaiveDate, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            date,
            amount,
            description: description.into(),
            counterparty_name: None,
            counterparty_iban: None,
            reference: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementFormat {
    Mt940,
    Camt053,
    Csv,
    Pdf,
}

impl StatementFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mt940 => "MT940",
            Self::Camt053 => "CAMT.053",
            Self::Csv => "CSV",
            Self::Pdf => "PDF",
        }
    }

    /// Format by name, as a user would type it (`mt940`, `camt`, `camt.053`, ...)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mt940" | "sta" => Some(Self::Mt940),
            "camt" | "camt053" | "camt.053" | "xml" => Some(Self::Camt053),
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Sniff the format from content first, then the file extension
    pub fn detect(bytes: &[u8], file_name: &str) -> Option<Self> {
        let head_len = bytes.len().min(4096);
        let head = String::from_utf8_lossy(&bytes[..head_len]);
        let head = head.trim_start_matches('\u{feff}').trim_start();
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if head.starts_with("<?xml") || head.starts_with("<Document") {
            return Some(Self::Camt053);
        }
        if head.starts_with("%PDF") {
            return Some(Self::Pdf);
        }
        let has_mt940_tags = head.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with(":20:") || line.starts_with(":25:")
        });
        if matches!(extension.as_str(), "sta" | "940" | "mt940") || has_mt940_tags {
            return Some(Self::Mt940);
        }
        match extension.as_str() {
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatementFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of parsing one statement file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOutcome {
    pub format: StatementFormat,
    /// Bank or template that produced the rows, when known
    pub source: Option<String>,
    pub transactions: Vec<RawTransaction>,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl ParseOutcome {
    pub fn new(format: StatementFormat) -> Self {
        Self {
            format,
            source: None,
            transactions: Vec::new(),
            skipped: 0,
            warnings: Vec::new(),
        }
    }

    /// Count a source row that is not a transaction
    pub fn skip(&mut self, warning: impl Into<String>) {
        self.skipped += 1;
        self.warnings.push(warning.into());
    }

    fn into_non_empty(self) -> Result<Self> {
        if self.transactions.is_empty() {
            return Err(LedgerError::EmptyResult {
                format: self.format.to_string(),
                skipped: self.skipped,
            });
        }
        Ok(self)
    }
}

/// Statement parser trait
pub trait StatementParser: Send + Sync {
    fn format(&self) -> StatementFormat;

    /// Parse the file content; row-level problems go into `skipped`
    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome>;
}

pub fn parser_for(format: StatementFormat) -> Box<dyn StatementParser> {
    match format {
        StatementFormat::Mt940 => Box::new(mt940::Mt940Parser),
        StatementFormat::Camt053 => Box::new(camt053::Camt053Parser),
        StatementFormat::Csv => Box::new(self::csv::CsvParser::default()),
        StatementFormat::Pdf => Box::new(pdf::PdfParser),
    }
}

/// Parse a statement file using the declared format or auto-detection
pub fn parse_statement(
    bytes: &[u8],
    file_name: &str,
    declared: Option<StatementFormat>,
) -> Result<ParseOutcome> {
    let format = declared
        .or_else(|| StatementFormat::detect(bytes, file_name))
        .ok_or_else(|| LedgerError::UnsupportedFormat(file_name.to_string()))?;

    let outcome = parser_for(format).parse(bytes)?;
    log::info!(
        "Statement Import: parsed {} as {} ({} transactions, {} skipped)",
        file_name,
        format,
        outcome.transactions.len(),
        outcome.skipped
    );
    for warning in &outcome.warnings {
        log::warn!("Statement Import: {}: {}", file_name, warning);
    }

    outcome.into_non_empty()
}

/// Decode text as UTF-8, falling back to ISO-8859-1 (legacy Dutch exports)
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            log::debug!("Statement Import: input is not UTF-8, decoding as ISO-8859-1");
            // Every Latin-1 byte is the Unicode scalar of the same value
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    }
}

/// Parse an amount in Dutch (1.234,56) or international (1,234.56) notation
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let mut cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '€' | '"' | '\''))
        .collect();
    for code in ["EUR", "USD"] {
        cleaned = cleaned.replace(code, "");
    }
    if cleaned.is_empty() {
        return None;
    }

    let (negative, digits) = if let Some(inner) = cleaned
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
    {
        (true, inner.to_string())
    } else if let Some(rest) = cleaned.strip_prefix('-') {
        (true, rest.to_string())
    } else if let Some(rest) = cleaned.strip_suffix('-') {
        (true, rest.to_string())
    } else {
        (false, cleaned.trim_start_matches('+').to_string())
    };

    let normalized = if digits.contains('.') && digits.contains(',') {
        if digits.rfind(',') > digits.rfind('.') {
            // Dutch: 1.234,56
            digits.replace('.', "").replace(',', ".")
        } else {
            // International: 1,234.56
            digits.replace(',', "")
        }
    } else if let Some(pos) = digits.rfind(',') {
        // 12,50 is a decimal comma; 1,000 is a thousands separator
        if digits.len() - pos <= 3 {
            digits.replace(',', ".")
        } else {
            digits.replace(',', "")
        }
    } else {
        digits
    };

    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

/// Parse a date in one of the formats Dutch banks export
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%Y", "%Y%m%d", "%Y/%m/%d"];
    let s = raw.trim().trim_matches('"');
    let s = s.get(..10).filter(|_| s.len() > 10 && s.as_bytes()[10] == b'T').unwrap_or(s);
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Collapse runs of whitespace into single spaces
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
