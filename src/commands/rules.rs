//! Bank rule administration

use super::with_connection;
use crate::models::{BankRule, CompanyId};
use crate::rules::{self, NewRule};

pub fn get_bank_rules(company_id: i64, include_inactive: bool) -> Result<Vec<BankRule>, String> {
    with_connection(|conn| rules::list_rules(conn, CompanyId(company_id), include_inactive))
}

pub fn create_bank_rule(company_id: i64, data: NewRule) -> Result<BankRule, String> {
    with_connection(|conn| rules::create_rule(conn, CompanyId(company_id), &data))
}

pub fn set_bank_rule_active(company_id: i64, rule_id: i64, active: bool) -> Result<BankRule, String> {
    with_connection(|conn| rules::set_rule_active(conn, CompanyId(company_id), rule_id, active))
}

/// System rules are only deleted with `force`
pub fn delete_bank_rule(company_id: i64, rule_id: i64, force: Option<bool>) -> Result<(), String> {
    with_connection(|conn| rules::delete_rule(conn, CompanyId(company_id), rule_id, force.unwrap_or(false)))
}
