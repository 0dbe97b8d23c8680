//! Chart of accounts and system account commands

use super::with_connection;
use crate::accounts::system::{self, BindingReport, SystemRole};
use crate::accounts::{self, NewAccount};
use crate::error::LedgerError;
use crate::models::{Account, CompanyId};

fn parse_role(raw: &str) -> crate::error::Result<SystemRole> {
    SystemRole::parse(raw).ok_or_else(|| LedgerError::validation(format!("Unknown system role '{}'", raw)))
}

pub fn get_accounts(company_id: i64, include_inactive: bool) -> Result<Vec<Account>, String> {
    with_connection(|conn| accounts::list_accounts(conn, CompanyId(company_id), include_inactive))
}

/// Account lookup by its code in the chart
pub fn get_account_by_code(company_id: i64, code: String) -> Result<Account, String> {
    with_connection(|conn| {
        accounts::find_account_by_code(conn, CompanyId(company_id), code.trim())?
            .ok_or_else(|| LedgerError::validation(format!("No account with code {}", code.trim())))
    })
}

pub fn create_account(company_id: i64, data: NewAccount) -> Result<Account, String> {
    with_connection(|conn| accounts::create_account(conn, CompanyId(company_id), &data))
}

/// The account a posting for `role` would use right now
pub fn resolve_system_account(company_id: i64, role: String) -> Result<Account, String> {
    with_connection(|conn| system::resolve(conn, CompanyId(company_id), parse_role(&role)?))
}

pub fn bind_system_account(company_id: i64, role: String, account_id: i64) -> Result<(), String> {
    with_connection(|conn| system::bind(conn, CompanyId(company_id), parse_role(&role)?, account_id))
}

pub fn unbind_system_account(company_id: i64, role: String) -> Result<bool, String> {
    with_connection(|conn| system::unbind(conn, CompanyId(company_id), parse_role(&role)?))
}

pub fn migrate_system_accounts(company_id: i64) -> Result<Vec<BindingReport>, String> {
    with_connection(|conn| system::migrate_conventions(conn, CompanyId(company_id)))
}
