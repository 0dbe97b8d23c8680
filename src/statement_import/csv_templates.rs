//! Bank templates for CSV statement import.
//!
//! Column names of the current export formats of Dutch banks. Columns are
//! looked up by header name, so reordered exports still parse.

use serde::{Deserialize, Serialize};

/// Column that tells whether the amount is money in or money out
#[derive(Debug, Clone, Copy)]
pub struct SignColumn {
    pub header: &'static str,
    /// Values (case-insensitive) that mark money going out
    pub debit_markers: &'static [&'static str],
}

/// A bank template with detection headers and column names
#[derive(Debug, Clone, Copy)]
pub struct BankTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Headers that must be present for detection (case-insensitive)
    pub detection_headers: &'static [&'static str],
    pub date_format: &'static str,
    pub decimal_separator: char,
    pub date_column: &'static str,
    pub amount_column: &'static str,
    /// Joined with spaces, in this order, to form the description
    pub description_columns: &'static [&'static str],
    pub counterparty_name_column: Option<&'static str>,
    pub counterparty_iban_column: Option<&'static str>,
    pub reference_column: Option<&'static str>,
    /// Present when the amount column is unsigned
    pub sign: Option<SignColumn>,
}

/// Result of bank detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetectionResult {
    pub template_id: Option<String>,
    pub bank_name: String,
    pub confidence: f32,
    pub detected_headers: Vec<String>,
}

/// Summary of a bank template for display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTemplateSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

/// Below this share of detection headers a file is not attributed to a bank
const MIN_CONFIDENCE: f32 = 0.75;

const ING: BankTemplate = BankTemplate {
    id: "ing",
    name: "ING",
    description: "ING Bankieren CSV-export (puntkomma of komma)",
    detection_headers: &["Datum", "Naam / Omschrijving", "Tegenrekening", "Af Bij", "Bedrag (EUR)"],
    date_format: "%Y%m%d",
    decimal_separator: ',',
    date_column: "Datum",
    amount_column: "Bedrag (EUR)",
    description_columns: &["Naam / Omschrijving", "Mededelingen"],
    counterparty_name_column: Some("Naam / Omschrijving"),
    counterparty_iban_column: Some("Tegenrekening"),
    reference_column: None,
    sign: Some(SignColumn {
        header: "Af Bij",
        debit_markers: &["Af", "Debit"],
    }),
};

const RABOBANK: BankTemplate = BankTemplate {
    id: "rabobank",
    name: "Rabobank",
    description: "Rabobank transactie-export (CSV)",
    detection_headers: &["IBAN/BBAN", "Volgnr", "Datum", "Bedrag", "Naam tegenpartij", "Omschrijving-1"],
    date_format: "%Y-%m-%d",
    decimal_separator: ',',
    date_column: "Datum",
    amount_column: "Bedrag",
    description_columns: &["Naam tegenpartij", "Omschrijving-1", "Omschrijving-2", "Omschrijving-3"],
    counterparty_name_column: Some("Naam tegenpartij"),
    counterparty_iban_column: Some("Tegenrekening IBAN/BBAN"),
    reference_column: Some("Betalingskenmerk"),
    sign: None,
};

const BUNQ: BankTemplate = BankTemplate {
    id: "bunq",
    name: "bunq",
    description: "bunq statement export (CSV)",
    detection_headers: &["Date", "Interest Date", "Amount", "Counterparty", "Description"],
    date_format: "%Y-%m-%d",
    decimal_separator: '.',
    date_column: "Date",
    amount_column: "Amount",
    description_columns: &["Name", "Description"],
    counterparty_name_column: Some("Name"),
    counterparty_iban_column: Some("Counterparty"),
    reference_column: None,
    sign: None,
};

const KNAB: BankTemplate = BankTemplate {
    id: "knab",
    name: "Knab",
    description: "Knab transactieoverzicht (CSV)",
    detection_headers: &["Rekeningnummer", "Transactiedatum", "CreditDebet", "Bedrag", "Tegenrekeninghouder"],
    date_format: "%d-%m-%Y",
    decimal_separator: ',',
    date_column: "Transactiedatum",
    amount_column: "Bedrag",
    description_columns: &["Tegenrekeninghouder", "Omschrijving"],
    counterparty_name_column: Some("Tegenrekeninghouder"),
    counterparty_iban_column: Some("Tegenrekeningnummer"),
    reference_column: Some("Referentie"),
    sign: Some(SignColumn {
        header: "CreditDebet",
        debit_markers: &["D"],
    }),
};

pub fn get_all_templates() -> Vec<&'static BankTemplate> {
    vec![&ING, &RABOBANK, &BUNQ, &KNAB]
}

pub fn get_template(id: &str) -> Option<&'static BankTemplate> {
    get_all_templates().into_iter().find(|t| t.id == id)
}

pub fn get_template_summaries() -> Vec<BankTemplateSummary> {
    get_all_templates()
        .into_iter()
        .map(|t| BankTemplateSummary {
            id: t.id.to_string(),
            name: t.name.to_string(),
            description: Some(t.description.to_string()),
        })
        .collect()
}

fn normalize_header(header: &str) -> String {
    header.trim().trim_matches('"').to_lowercase()
}

/// Position of a named column in the header row
pub fn column_index(headers: &[String], name: &str) -> Option<usize> {
    let wanted = name.to_lowercase();
    headers.iter().position(|h| normalize_header(h) == wanted)
}

/// Pick the template whose detection headers best cover this header row
pub fn detect_bank(headers: &[String]) -> BankDetectionResult {
    let mut best_match: Option<(&BankTemplate, f32)> = None;

    for template in get_all_templates() {
        let matched_count = template
            .detection_headers
            .iter()
            .filter(|dh| column_index(headers, dh).is_some())
            .count();
        let confidence = matched_count as f32 / template.detection_headers.len() as f32;

        if confidence >= MIN_CONFIDENCE && best_match.map_or(true, |(_, best)| confidence > best) {
            best_match = Some((template, confidence));
        }
    }

    match best_match {
        Some((template, confidence)) => BankDetectionResult {
            template_id: Some(template.id.to_string()),
            bank_name: template.name.to_string(),
            confidence,
            detected_headers: headers.to_vec(),
        },
        None => BankDetectionResult {
            template_id: None,
            bank_name: "Onbekend".to_string(),
            confidence: 0.0,
            detected_headers: headers.to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_ing() {
        let result = detect_bank(&headers(&[
            "Datum",
            "Naam / Omschrijving",
            "Rekening",
            "Tegenrekening",
            "Code",
            "Af Bij",
            "Bedrag (EUR)",
            "Mutatiesoort",
            "Mededelingen",
        ]));
        assert_eq!(result.template_id.as_deref(), Some("ing"));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_detect_rabobank_over_generic_datum() {
        let result = detect_bank(&headers(&[
            "IBAN/BBAN",
            "Munt",
            "Volgnr",
            "Datum",
            "Bedrag",
            "Tegenrekening IBAN/BBAN",
            "Naam tegenpartij",
            "Omschrijving-1",
        ]));
        assert_eq!(result.template_id.as_deref(), Some("rabobank"));
    }

    #[test]
    fn test_unknown_headers() {
        let result = detect_bank(&headers(&["Datum", "Bedrag", "Omschrijving"]));
        assert!(result.template_id.is_none());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_get_template() {
        assert_eq!(get_template("knab").map(|t| t.name), Some("Knab"));
        assert!(get_template("abn").is_none());
        assert_eq!(get_template_summaries().len(), 4);
    }
}
