//! System account resolution.
//!
//! Posting paths never reference structural accounts (receivables, VAT,
//! cash, private) by id. They ask for a [`SystemRole`] and get the one
//! active account currently playing it. An explicit binding in
//! `system_account_bindings` wins; without one, the chart is searched by
//! code and name convention. Nothing here is cached: activation state can
//! change between two postings.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::{Account, AccountType, CompanyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemRole {
    AccountsReceivable,
    AccountsPayable,
    VatPayable,
    VatReceivable,
    Cash,
    Private,
    TravelCosts,
}

/// Convention used when no explicit binding exists
struct Convention {
    account_type: AccountType,
    codes: &'static [&'static str],
    name_patterns: &'static [&'static str],
}

impl SystemRole {
    pub const ALL: [SystemRole; 7] = [
        SystemRole::AccountsReceivable,
        SystemRole::AccountsPayable,
        SystemRole::VatPayable,
        SystemRole::VatReceivable,
        SystemRole::Cash,
        SystemRole::Private,
        SystemRole::TravelCosts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountsReceivable => "ACCOUNTS_RECEIVABLE",
            Self::AccountsPayable => "ACCOUNTS_PAYABLE",
            Self::VatPayable => "VAT_PAYABLE",
            Self::VatReceivable => "VAT_RECEIVABLE",
            Self::Cash => "CASH",
            Self::Private => "PRIVATE",
            Self::TravelCosts => "TRAVEL_COSTS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
    }

    pub fn account_type(&self) -> AccountType {
        self.convention().account_type
    }

    fn convention(&self) -> Convention {
        match self {
            Self::AccountsReceivable => Convention {
                account_type: AccountType::Asset,
                codes: &["1300"],
                name_patterns: &["debiteuren", "accounts receivable"],
            },
            Self::AccountsPayable => Convention {
                account_type: AccountType::Liability,
                codes: &["1600"],
                name_patterns: &["crediteuren", "accounts payable"],
            },
            Self::VatPayable => Convention {
                account_type: AccountType::Liability,
                codes: &["1700"],
                name_patterns: &["te betalen btw", "btw af te dragen", "vat payable"],
            },
            Self::VatReceivable => Convention {
                account_type: AccountType::Asset,
                codes: &["1710"],
                name_patterns: &["te vorderen btw", "voorbelasting", "vat receivable"],
            },
            Self::Cash => Convention {
                account_type: AccountType::Asset,
                codes: &["1000"],
                name_patterns: &["kas", "cash"],
            },
            Self::Private => Convention {
                account_type: AccountType::Equity,
                codes: &[],
                name_patterns: &["prive", "privé", "private", "drawings"],
            },
            Self::TravelCosts => Convention {
                account_type: AccountType::Expense,
                codes: &[],
                name_patterns: &["reiskosten", "travel"],
            },
        }
    }

    fn matches(&self, account: &Account) -> bool {
        let convention = self.convention();
        if account.account_type != convention.account_type {
            return false;
        }
        if convention.codes.contains(&account.code.trim()) {
            return true;
        }
        let name = account.name.to_lowercase();
        convention
            .name_patterns
            .iter()
            .any(|pattern| name.contains(pattern))
    }
}

impl std::fmt::Display for SystemRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active accounts the naming convention would pick for `role`
pub fn convention_candidates(
    conn: &Connection,
    company: CompanyId,
    role: SystemRole,
) -> Result<Vec<Account>> {
    let sql = format!(
        "SELECT {} FROM accounts WHERE company_id = ?1 AND is_active = 1 AND account_type = ?2 ORDER BY code",
        Account::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let accounts = stmt
        .query_map(params![company, role.account_type()], Account::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(accounts.into_iter().filter(|a| role.matches(a)).collect())
}

fn bound_account_id(conn: &Connection, company: CompanyId, role: SystemRole) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT account_id FROM system_account_bindings WHERE company_id = ?1 AND role = ?2",
            params![company, role.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Resolve the single active account playing `role` for `company`
pub fn resolve(conn: &Connection, company: CompanyId, role: SystemRole) -> Result<Account> {
    if let Some(account_id) = bound_account_id(conn, company, role)? {
        let account = super::get_account(conn, company, account_id)?;
        if !account.is_active {
            log::warn!(
                "System role {} is bound to inactive account {}",
                role,
                account.label()
            );
            return Err(LedgerError::SystemAccountNotFound(role));
        }
        return Ok(account);
    }

    let mut candidates = convention_candidates(conn, company, role)?;
    match candidates.len() {
        0 => Err(LedgerError::SystemAccountNotFound(role)),
        1 => Ok(candidates.remove(0)),
        _ => Err(LedgerError::AmbiguousSystemAccount {
            role,
            candidates: candidates.iter().map(Account::label).collect(),
        }),
    }
}

/// Bind `role` to an account after checking it can play that role
pub fn bind(conn: &Connection, company: CompanyId, role: SystemRole, account_id: i64) -> Result<()> {
    let account = super::get_account(conn, company, account_id)?;
    if !account.is_active {
        return Err(LedgerError::validation(format!(
            "Account {} is inactive and cannot be bound to {}",
            account.label(),
            role
        )));
    }
    if account.account_type != role.account_type() {
        return Err(LedgerError::validation(format!(
            "Account {} is {} but {} requires {}",
            account.label(),
            account.account_type,
            role,
            role.account_type()
        )));
    }

    conn.execute(
        "INSERT INTO system_account_bindings (company_id, role, account_id)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(company_id, role) DO UPDATE SET account_id = excluded.account_id,
             bound_at = datetime('now')",
        params![company, role.as_str(), account_id],
    )?;

    log::info!("Bound system role {} to account {}", role, account.label());
    Ok(())
}

pub fn unbind(conn: &Connection, company: CompanyId, role: SystemRole) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM system_account_bindings WHERE company_id = ?1 AND role = ?2",
        params![company, role.as_str()],
    )?;
    Ok(removed > 0)
}

/// Roles currently bound to `account_id`
pub fn roles_bound_to(conn: &Connection, company: CompanyId, account_id: i64) -> Result<Vec<SystemRole>> {
    let mut stmt = conn.prepare(
        "SELECT role FROM system_account_bindings WHERE company_id = ?1 AND account_id = ?2",
    )?;
    let roles = stmt
        .query_map(params![company, account_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(roles.iter().filter_map(|r| SystemRole::parse(r)).collect())
}

/// Outcome of [`migrate_conventions`] for one role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingReport {
    pub role: SystemRole,
    pub account_id: Option<i64>,
    pub message: String,
}

/// One-time migration: bind every unbound role the convention resolves unambiguously
pub fn migrate_conventions(conn: &Connection, company: CompanyId) -> Result<Vec<BindingReport>> {
    let mut reports = Vec::new();

    for role in SystemRole::ALL {
        if let Some(account_id) = bound_account_id(conn, company, role)? {
            reports.push(BindingReport {
                role,
                account_id: Some(account_id),
                message: "already bound".to_string(),
            });
            continue;
        }

        let candidates = convention_candidates(conn, company, role)?;
        let report = match candidates.as_slice() {
            [only] => {
                bind(conn, company, role, only.id)?;
                BindingReport {
                    role,
                    account_id: Some(only.id),
                    message: format!("bound to {}", only.label()),
                }
            }
            [] => BindingReport {
                role,
                account_id: None,
                message: "no candidate account".to_string(),
            },
            many => BindingReport {
                role,
                account_id: None,
                message: format!(
                    "ambiguous: {}",
                    many.iter().map(Account::label).collect::<Vec<_>>().join(", ")
                ),
            },
        };
        reports.push(report);
    }

    Ok(reports)
}
