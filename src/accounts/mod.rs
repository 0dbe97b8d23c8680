//! Chart of accounts.
//!
//! Accounts are never deleted, only deactivated.

pub mod system;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::{Account, AccountType, CompanyId, VatRate};
use system::SystemRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub vat_rate: VatRate,
    pub tax_category: Option<String>,
}

pub fn create_account(conn: &Connection, company: CompanyId, data: &NewAccount) -> Result<Account> {
    let code = data.code.trim();
    let name = data.name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(LedgerError::validation("Account code and name are required"));
    }

    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM accounts WHERE company_id = ?1 AND code = ?2",
            params![company, code],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    if exists {
        return Err(LedgerError::validation(format!("Account code '{}' already exists", code)));
    }

    conn.execute(
        "INSERT INTO accounts (company_id, code, name, account_type, vat_code, tax_category)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            company,
            code,
            name,
            data.account_type,
            data.vat_rate,
            data.tax_category
        ],
    )?;

    get_account(conn, company, conn.last_insert_rowid())
}

pub fn get_account(conn: &Connection, company: CompanyId, account_id: i64) -> Result<Account> {
    let sql = format!(
        "SELECT {} FROM accounts WHERE company_id = ?1 AND id = ?2",
        Account::COLUMNS
    );
    conn.query_row(&sql, params![company, account_id], Account::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("Account", account_id))
}

pub fn find_account_by_code(conn: &Connection, company: CompanyId, code: &str) -> Result<Option<Account>> {
    let sql = format!(
        "SELECT {} FROM accounts WHERE company_id = ?1 AND code = ?2",
        Account::COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![company, code.trim()], Account::from_row)
        .optional()?)
}

pub fn list_accounts(conn: &Connection, company: CompanyId, include_inactive: bool) -> Result<Vec<Account>> {
    let sql = format!(
        "SELECT {} FROM accounts WHERE company_id = ?1 AND (is_active = 1 OR ?2) ORDER BY code",
        Account::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let accounts = stmt
        .query_map(params![company, include_inactive], Account::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(accounts)
}

/// Active account usable as a posting target
pub fn require_active(conn: &Connection, company: CompanyId, account_id: i64) -> Result<Account> {
    let account = get_account(conn, company, account_id)?;
    if !account.is_active {
        return Err(LedgerError::validation(format!(
            "Account {} is inactive",
            account.label()
        )));
    }
    Ok(account)
}

/// Count of open items that still need system accounts to be posted
fn open_item_count(conn: &Connection, company: CompanyId) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM invoices WHERE company_id = ?1 AND status = 'DRAFT')
          + (SELECT COUNT(*) FROM bank_transactions WHERE company_id = ?1 AND status = 'UNMATCHED')
          + (SELECT COUNT(*) FROM mileage_logs WHERE company_id = ?1 AND is_booked = 0)
          + (SELECT COUNT(*) FROM journal_entries WHERE company_id = ?1 AND status = 'DRAFT')",
        [company],
        |row| row.get(0),
    )?)
}

/// Deactivate an account unless that would leave a system role without a target
pub fn deactivate_account(conn: &Connection, company: CompanyId, account_id: i64) -> Result<Account> {
    let account = get_account(conn, company, account_id)?;
    if !account.is_active {
        return Ok(account);
    }

    let bound = system::roles_bound_to(conn, company, account_id)?;
    if !bound.is_empty() {
        let roles: Vec<&str> = bound.iter().map(SystemRole::as_str).collect();
        return Err(LedgerError::validation(format!(
            "Account {} is bound to system role(s) {}; rebind before deactivating",
            account.label(),
            roles.join(", ")
        )));
    }

    let open_items = open_item_count(conn, company)?;
    if open_items > 0 {
        for role in SystemRole::ALL {
            let candidates = system::convention_candidates(conn, company, role)?;
            if candidates.len() == 1 && candidates[0].id == account_id {
                return Err(LedgerError::validation(format!(
                    "Account {} is the only {} account and {} open item(s) still need it",
                    account.label(),
                    role,
                    open_items
                )));
            }
        }
    }

    conn.execute(
        "UPDATE accounts SET is_active = 0 WHERE company_id = ?1 AND id = ?2",
        params![company, account_id],
    )?;
    log::info!("Deactivated account {}", account.label());

    get_account(conn, company, account_id)
}

pub fn reactivate_account(conn: &Connection, company: CompanyId, account_id: i64) -> Result<Account> {
    conn.execute(
        "UPDATE accounts SET is_active = 1 WHERE company_id = ?1 AND id = ?2",
        params![company, account_id],
    )?;
    get_account(conn, company, account_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{account_id, seeded_connection, COMPANY};

    #[test]
    fn test_create_account_rejects_duplicate_code() {
        let conn = seeded_connection();
        let data = NewAccount {
            code: "8000".to_string(),
            name: "Omzet hoog".to_string(),
            account_type: AccountType::Revenue,
            vat_rate: VatRate::Standard,
            tax_category: None,
        };
        assert!(matches!(
            create_account(&conn, COMPANY, &data),
            Err(LedgerError::Validation(_))
        ));

        let data = NewAccount {
            code: "8100".to_string(),
            ..data
        };
        let created = create_account(&conn, COMPANY, &data).unwrap();
        assert_eq!(created.vat_rate, VatRate::Standard);
        assert!(created.is_active);
    }

    #[test]
    fn test_deactivate_refuses_bound_account() {
        let conn = seeded_connection();
        let kas = account_id(&conn, "1000");
        system::bind(&conn, COMPANY, SystemRole::Cash, kas).unwrap();
        assert!(matches!(
            deactivate_account(&conn, COMPANY, kas),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_deactivate_refuses_sole_candidate_with_open_items() {
        let conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        conn.execute(
            "INSERT INTO bank_transactions (company_id, bank_account_id, transaction_date, description, amount, fingerprint)
             VALUES (1, ?1, '2024-03-01', 'open', -500, 'fp-open')",
            [bank],
        )
        .unwrap();
        let kas = account_id(&conn, "1000");
        assert!(deactivate_account(&conn, COMPANY, kas).is_err());

        // A non-structural account can go
        let telefoon = account_id(&conn, "4100");
        let account = deactivate_account(&conn, COMPANY, telefoon).unwrap();
        assert!(!account.is_active);
    }

    #[test]
    fn test_deactivate_without_open_items() {
        let conn = seeded_connection();
        let kas = account_id(&conn, "1000");
        let account = deactivate_account(&conn, COMPANY, kas).unwrap();
        assert!(!account.is_active);
        assert_eq!(list_accounts(&conn, COMPANY, false).unwrap().len(), 12);
        assert_eq!(list_accounts(&conn, COMPANY, true).unwrap().len(), 13);
    }
}
