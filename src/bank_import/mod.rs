//! Bank transaction import.
//!
//! Persists canonical transactions with a content fingerprint. Deduplication
//! relies on the `UNIQUE(company_id, fingerprint)` constraint, so two imports
//! racing on the same file cannot both insert a row. Rows commit one by one.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::accounts;
use crate::error::{LedgerError, Result};
use crate::models::{to_cents, AccountType, BankTransaction, CompanyId, TransactionStatus};
use crate::rules;
use crate::statement_import::{self, RawTransaction, StatementFormat};

/// A row that could not be stored; the import continues past it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub new_transactions: usize,
    pub duplicates: usize,
    /// Source rows the parser did not turn into transactions
    pub skipped: usize,
    pub matched: usize,
    pub errors: Vec<ImportRowError>,
    pub bank_transaction_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Skip format sniffing
    pub declared_format: Option<StatementFormat>,
    /// Offer every new row to the rule matcher
    pub auto_match: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            declared_format: None,
            auto_match: true,
        }
    }
}

/// Outcome of a full statement import (parse, store, match)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementImportResult {
    pub import_id: i64,
    pub file_name: String,
    pub format: StatementFormat,
    pub source: Option<String>,
    #[serde(flatten)]
    pub result: ImportResult,
    pub warnings: Vec<String>,
}

/// Entry in the statement import history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementImportRecord {
    pub id: i64,
    pub bank_account_id: i64,
    pub file_name: String,
    pub file_hash: String,
    pub format: String,
    pub imported_at: String,
    pub new_count: i64,
    pub duplicate_count: i64,
    pub skipped_count: i64,
    pub error_count: i64,
}

/// Lower-case, trimmed, single-spaced
pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable identity of a bank row, hex encoded SHA-256
pub fn fingerprint(
    company: CompanyId,
    bank_account_id: i64,
    date: NaiveDate,
    amount_cents: i64,
    description: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(company.0.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(bank_account_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(amount_cents.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_description(description).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// The target of an import must be an active asset account
fn require_bank_account(conn: &Connection, company: CompanyId, bank_account_id: i64) -> Result<()> {
    let account = accounts::get_account(conn, company, bank_account_id)?;
    if !account.is_active {
        return Err(LedgerError::validation(format!(
            "Bank account {} is inactive",
            account.label()
        )));
    }
    if account.account_type != AccountType::Asset {
        return Err(LedgerError::validation(format!(
            "Account {} is not an asset account and cannot hold bank transactions",
            account.label()
        )));
    }
    Ok(())
}

/// Store canonical transactions, skipping ones already present
pub fn import_transactions(
    conn: &Connection,
    company: CompanyId,
    bank_account_id: i64,
    transactions: &[RawTransaction],
) -> Result<ImportResult> {
    require_bank_account(conn, company, bank_account_id)?;
    let result = insert_rows(conn, company, bank_account_id, transactions, None)?;
    log::info!(
        "Bank Import: {} new, {} duplicates, {} errors into account {}",
        result.new_transactions,
        result.duplicates,
        result.errors.len(),
        bank_account_id
    );
    Ok(result)
}

fn insert_rows(
    conn: &Connection,
    company: CompanyId,
    bank_account_id: i64,
    transactions: &[RawTransaction],
    import_id: Option<i64>,
) -> Result<ImportResult> {
    let mut result = ImportResult::default();
    let mut stmt = conn.prepare(
        "INSERT INTO bank_transactions (
            company_id, bank_account_id, transaction_date, description, amount,
            fingerprint, counterparty_name, counterparty_iban, reference, status, import_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'UNMATCHED', ?10)
         ON CONFLICT(company_id, fingerprint) DO NOTHING",
    )?;

    for (index, txn) in transactions.iter().enumerate() {
        let description = txn.description.trim();
        if description.is_empty() {
            result.errors.push(ImportRowError {
                index,
                message: "empty description".to_string(),
            });
            continue;
        }
        let cents = match to_cents(txn.amount) {
            Ok(cents) => cents,
            Err(e) => {
                result.errors.push(ImportRowError {
                    index,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if cents == 0 {
            result.errors.push(ImportRowError {
                index,
                message: format!("zero amount on {} '{}'", txn.date, description),
            });
            continue;
        }

        let fp = fingerprint(company, bank_account_id, txn.date, cents, description);
        match stmt.execute(params![
            company,
            bank_account_id,
            txn.date,
            description,
            cents,
            fp,
            txn.counterparty_name,
            txn.counterparty_iban,
            txn.reference,
            import_id,
        ]) {
            Ok(0) => {
                log::debug!("Bank Import: duplicate row {} ({})", index, &fp[..12]);
                result.duplicates += 1;
            }
            Ok(_) => {
                result.new_transactions += 1;
                result.bank_transaction_ids.push(conn.last_insert_rowid());
            }
            Err(e) => {
                log::warn!("Bank Import: row {} failed: {}", index, e);
                result.errors.push(ImportRowError {
                    index,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(result)
}

/// Parse a statement file, store its rows and optionally auto-match them
pub fn import_statement(
    conn: &mut Connection,
    company: CompanyId,
    bank_account_id: i64,
    bytes: &[u8],
    file_name: &str,
    options: ImportOptions,
) -> Result<StatementImportResult> {
    require_bank_account(conn, company, bank_account_id)?;

    let outcome = statement_import::parse_statement(bytes, file_name, options.declared_format)?;
    let file_hash = hash_bytes(bytes);
    let mut warnings = outcome.warnings.clone();

    let previous: Option<String> = conn
        .query_row(
            "SELECT imported_at FROM statement_imports
             WHERE company_id = ?1 AND bank_account_id = ?2 AND file_hash = ?3
             ORDER BY id DESC LIMIT 1",
            params![company, bank_account_id, file_hash],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(imported_at) = previous {
        log::warn!("Bank Import: {} was already imported at {}", file_name, imported_at);
        warnings.push(format!("file was already imported at {}", imported_at));
    }

    conn.execute(
        "INSERT INTO statement_imports (company_id, bank_account_id, file_name, file_hash, format)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![company, bank_account_id, file_name, file_hash, outcome.format.as_str()],
    )?;
    let import_id = conn.last_insert_rowid();

    let mut result = insert_rows(conn, company, bank_account_id, &outcome.transactions, Some(import_id))?;
    result.skipped = outcome.skipped;

    conn.execute(
        "UPDATE statement_imports
         SET new_count = ?1, duplicate_count = ?2, skipped_count = ?3, error_count = ?4
         WHERE id = ?5",
        params![
            result.new_transactions as i64,
            result.duplicates as i64,
            result.skipped as i64,
            result.errors.len() as i64,
            import_id
        ],
    )?;

    if options.auto_match {
        for &id in &result.bank_transaction_ids {
            match rules::match_transaction(conn, company, id) {
                Ok(m) if m.matched => result.matched += 1,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Bank Import: auto-match of transaction {} failed: {}", id, e);
                    warnings.push(format!("auto-match of transaction {} failed: {}", id, e));
                }
            }
        }
    }

    log::info!(
        "Bank Import: {} ({}) -> {} new, {} duplicates, {} skipped, {} matched, {} errors",
        file_name,
        outcome.format,
        result.new_transactions,
        result.duplicates,
        result.skipped,
        result.matched,
        result.errors.len()
    );

    Ok(StatementImportResult {
        import_id,
        file_name: file_name.to_string(),
        format: outcome.format,
        source: outcome.source,
        result,
        warnings,
    })
}

pub fn get_transaction(conn: &Connection, company: CompanyId, id: i64) -> Result<BankTransaction> {
    let sql = format!(
        "SELECT {} FROM bank_transactions WHERE company_id = ?1 AND id = ?2",
        BankTransaction::COLUMNS
    );
    conn.query_row(&sql, params![company, id], BankTransaction::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("BankTransaction", id))
}

pub fn list_transactions(
    conn: &Connection,
    company: CompanyId,
    status: Option<TransactionStatus>,
) -> Result<Vec<BankTransaction>> {
    let sql = format!(
        "SELECT {} FROM bank_transactions
         WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY transaction_date, id",
        BankTransaction::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![company, status], BankTransaction::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_imports(conn: &Connection, company: CompanyId) -> Result<Vec<StatementImportRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, bank_account_id, file_name, file_hash, format, imported_at,
                new_count, duplicate_count, skipped_count, error_count
         FROM statement_imports WHERE company_id = ?1 ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map([company], |row| {
            Ok(StatementImportRecord {
                id: row.get(0)?,
                bank_account_id: row.get(1)?,
                file_name: row.get(2)?,
                file_hash: row.get(3)?,
                format: row.get(4)?,
                imported_at: row.get(5)?,
                new_count: row.get(6)?,
                duplicate_count: row.get(7)?,
                skipped_count: row.get(8)?,
                error_count: row.get(9)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{account_id, count, seeded_connection, COMPANY};
    use crate::statement_import::mt940::{self, ING_SAMPLE};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_fingerprint_normalizes_description() {
        let amount = -1250;
        let a = fingerprint(COMPANY, 4, date(2024, 1, 2), amount, "  KPN   B.V. ");
        let b = fingerprint(COMPANY, 4, date(2024, 1, 2), amount, "kpn b.v.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other_amount = fingerprint(COMPANY, 4, date(2024, 1, 2), -1200, "kpn b.v.");
        let other_account = fingerprint(COMPANY, 5, date(2024, 1, 2), amount, "kpn b.v.");
        let other_company = fingerprint(CompanyId(2), 4, date(2024, 1, 2), amount, "kpn b.v.");
        assert_ne!(a, other_amount);
        assert_ne!(a, other_account);
        assert_ne!(a, other_company);
    }

    #[test]
    fn test_import_twice_is_idempotent() {
        let conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let outcome = mt940::parse_text(ING_SAMPLE);

        let first = import_transactions(&conn, COMPANY, bank, &outcome.transactions).unwrap();
        assert_eq!(first.new_transactions, 5);
        assert_eq!(first.bank_transaction_ids.len(), 5);

        let second = import_transactions(&conn, COMPANY, bank, &outcome.transactions).unwrap();
        assert_eq!(second.new_transactions, 0);
        assert_eq!(second.duplicates, 5);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM bank_transactions"), 5);
    }

    #[test]
    fn test_partial_overlap() {
        let conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let outcome = mt940::parse_text(ING_SAMPLE);

        import_transactions(&conn, COMPANY, bank, &outcome.transactions[..1]).unwrap();
        let result = import_transactions(&conn, COMPANY, bank, &outcome.transactions).unwrap();
        assert_eq!(result.new_transactions, 4);
        assert_eq!(result.duplicates, 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_row_errors_do_not_stop_import() {
        let conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let rows = vec![
            RawTransaction::new(date(2024, 2, 1), Decimal::ZERO, "Nul"),
            RawTransaction::new(date(2024, 2, 1), Decimal::from(-5), "   "),
            RawTransaction::new(date(2024, 2, 2), Decimal::from(-5), "Parkeren"),
        ];
        let result = import_transactions(&conn, COMPANY, bank, &rows).unwrap();
        assert_eq!(result.new_transactions, 1);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].index, 0);
        assert_eq!(result.errors[1].index, 1);
    }

    #[test]
    fn test_out_of_range_amount_is_a_row_error() {
        let conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let huge = Decimal::from_str("100000000000000000000").unwrap();
        let rows = vec![
            RawTransaction::new(date(2024, 2, 1), huge, "Overflow"),
            RawTransaction::new(date(2024, 2, 2), Decimal::from(-5), "Parkeren"),
        ];
        let result = import_transactions(&conn, COMPANY, bank, &rows).unwrap();
        assert_eq!(result.new_transactions, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].index, 0);
        assert!(result.errors[0].message.contains("out of range"));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM bank_transactions"), 1);
    }

    #[test]
    fn test_bank_account_must_be_active_asset() {
        let conn = seeded_connection();
        let rows = vec![RawTransaction::new(date(2024, 2, 2), Decimal::from(-5), "Parkeren")];

        let expense = account_id(&conn, "4000");
        assert!(matches!(
            import_transactions(&conn, COMPANY, expense, &rows),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            import_transactions(&conn, COMPANY, 9999, &rows),
            Err(LedgerError::NotFound { .. })
        ));

        let bank = account_id(&conn, "1100");
        conn.execute("UPDATE accounts SET is_active = 0 WHERE id = ?1", [bank]).unwrap();
        assert!(matches!(
            import_transactions(&conn, COMPANY, bank, &rows),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM bank_transactions"), 0);
    }

    #[test]
    fn test_import_statement_records_history_and_matches() {
        let mut conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let telefoon = account_id(&conn, "4100");
        conn.execute(
            "INSERT INTO bank_rules (company_id, keyword, match_type, target_account_id, priority)
             VALUES (1, 'kpn', 'CONTAINS', ?1, 10)",
            [telefoon],
        )
        .unwrap();

        let imported = import_statement(
            &mut conn,
            COMPANY,
            bank,
            ING_SAMPLE.as_bytes(),
            "januari.sta",
            ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(imported.format, StatementFormat::Mt940);
        assert_eq!(imported.result.new_transactions, 5);
        assert_eq!(imported.result.skipped, 2);
        assert_eq!(imported.result.matched, 1);

        let again = import_statement(
            &mut conn,
            COMPANY,
            bank,
            ING_SAMPLE.as_bytes(),
            "januari.sta",
            ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(again.result.new_transactions, 0);
        assert_eq!(again.result.duplicates, 5);
        assert!(again.warnings.iter().any(|w| w.contains("already imported")));

        let history = list_imports(&conn, COMPANY).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].new_count, 5);
        assert_eq!(history[0].duplicate_count, 5);

        let unmatched = list_transactions(&conn, COMPANY, Some(TransactionStatus::Unmatched)).unwrap();
        assert_eq!(unmatched.len(), 4);
    }

    #[test]
    fn test_import_statement_rejects_unknown_format() {
        let mut conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let result = import_statement(&mut conn, COMPANY, bank, b"hello", "notes.docx", ImportOptions::default());
        assert!(matches!(result, Err(LedgerError::UnsupportedFormat(_))));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM statement_imports"), 0);
    }
}
