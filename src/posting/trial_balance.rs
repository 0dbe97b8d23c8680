use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{from_cents, AccountType, CompanyId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialBalanceRow {
    pub account_id: i64,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub debit: Decimal,
    pub credit: Decimal,
    /// Debit minus credit
    pub balance: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialBalance {
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }
}

/// Debit and credit totals per account with postings, ordered by code
pub fn trial_balance(conn: &Connection, company: CompanyId, include_drafts: bool) -> Result<TrialBalance> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.code, a.name, a.account_type, SUM(l.debit), SUM(l.credit)
         FROM journal_lines l
         JOIN journal_entries e ON e.id = l.entry_id
         JOIN accounts a ON a.id = l.account_id
         WHERE e.company_id = ?1 AND (?2 = 1 OR e.status = 'FINAL')
         GROUP BY a.id, a.code, a.name, a.account_type
         ORDER BY a.code",
    )?;
    let rows = stmt
        .query_map(params![company, include_drafts], |row| {
            let debit = from_cents(row.get(4)?);
            let credit = from_cents(row.get(5)?);
            Ok(TrialBalanceRow {
                account_id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                account_type: row.get(3)?,
                debit,
                credit,
                balance: debit - credit,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let total_debit = rows.iter().map(|r| r.debit).sum();
    let total_credit = rows.iter().map(|r| r.credit).sum();
    Ok(TrialBalance {
        rows,
        total_debit,
        total_credit,
    })
}
