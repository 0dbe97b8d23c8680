//! Bank rules: keyword matching of imported transactions.
//!
//! Rules are evaluated in priority order (higher first); equal priorities go
//! to the rule created first, then the lower id. The first rule that matches
//! the transaction description wins.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::accounts;
use crate::bank_import;
use crate::error::{LedgerError, Result};
use crate::models::{BankRule, BankTransaction, CompanyId, MatchType, TransactionStatus};
use crate::posting::bank::{post_bank_match, BankBooking};

const RULE_ORDER: &str = "priority DESC, created_at ASC, id ASC";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub matched: bool,
    pub rule: Option<BankRule>,
    pub journal_entry_id: Option<i64>,
}

impl MatchResult {
    fn unmatched() -> Self {
        Self {
            matched: false,
            rule: None,
            journal_entry_id: None,
        }
    }
}

/// Totals of a bulk matching run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub examined: usize,
    pub matched: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub keyword: String,
    pub match_type: MatchType,
    pub target_account_id: i64,
    pub contact_id: Option<i64>,
    pub description_template: Option<String>,
    pub priority: i64,
    #[serde(default)]
    pub is_system_rule: bool,
}

impl BankRule {
    /// Case-insensitive keyword test against a transaction description
    pub fn matches(&self, description: &str) -> bool {
        let keyword = self.keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return false;
        }
        let description = description.trim().to_lowercase();
        match self.match_type {
            MatchType::Contains => description.contains(&keyword),
            MatchType::Exact => description == keyword,
        }
    }
}

/// First matching rule; `rules` must already be in evaluation order
pub fn select_rule<'a>(rules: &'a [BankRule], description: &str) -> Option<&'a BankRule> {
    rules.iter().find(|rule| rule.is_active && rule.matches(description))
}

/// Put rules in evaluation order
pub fn sort_rules(rules: &mut [BankRule]) {
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Expand `{description}`, `{counterparty}` and `{date}` in a rule template
pub fn render_description(template: Option<&str>, txn: &BankTransaction) -> String {
    let Some(template) = template.map(str::trim).filter(|t| !t.is_empty()) else {
        return txn.description.clone();
    };
    let rendered = template
        .replace("{description}", &txn.description)
        .replace("{counterparty}", txn.counterparty_name.as_deref().unwrap_or(""))
        .replace("{date}", &txn.transaction_date.format("%Y-%m-%d").to_string());
    let rendered = rendered.split_whitespace().collect::<Vec<_>>().join(" ");
    if rendered.is_empty() {
        txn.description.clone()
    } else {
        rendered
    }
}

pub fn load_active_rules(conn: &Connection, company: CompanyId) -> Result<Vec<BankRule>> {
    let sql = format!(
        "SELECT {} FROM bank_rules WHERE company_id = ?1 AND is_active = 1 ORDER BY {}",
        BankRule::COLUMNS,
        RULE_ORDER
    );
    let mut stmt = conn.prepare(&sql)?;
    let rules = stmt
        .query_map([company], BankRule::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules)
}

pub fn list_rules(conn: &Connection, company: CompanyId, include_inactive: bool) -> Result<Vec<BankRule>> {
    let sql = format!(
        "SELECT {} FROM bank_rules WHERE company_id = ?1 AND (is_active = 1 OR ?2) ORDER BY {}",
        BankRule::COLUMNS,
        RULE_ORDER
    );
    let mut stmt = conn.prepare(&sql)?;
    let rules = stmt
        .query_map(params![company, include_inactive], BankRule::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules)
}

pub fn get_rule(conn: &Connection, company: CompanyId, rule_id: i64) -> Result<BankRule> {
    let sql = format!(
        "SELECT {} FROM bank_rules WHERE company_id = ?1 AND id = ?2",
        BankRule::COLUMNS
    );
    conn.query_row(&sql, params![company, rule_id], BankRule::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("BankRule", rule_id))
}

pub fn create_rule(conn: &Connection, company: CompanyId, data: &NewRule) -> Result<BankRule> {
    let keyword = data.keyword.trim();
    if keyword.is_empty() {
        return Err(LedgerError::validation("Rule keyword is required"));
    }
    accounts::require_active(conn, company, data.target_account_id)?;

    conn.execute(
        "INSERT INTO bank_rules (company_id, keyword, match_type, target_account_id, contact_id,
                                 description_template, priority, is_system_rule)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            company,
            keyword,
            data.match_type,
            data.target_account_id,
            data.contact_id,
            data.description_template,
            data.priority,
            data.is_system_rule
        ],
    )?;
    let rule = get_rule(conn, company, conn.last_insert_rowid())?;
    log::info!(
        "Created bank rule {} '{}' ({}) -> account {}",
        rule.id,
        rule.keyword,
        rule.match_type,
        rule.target_account_id
    );
    Ok(rule)
}

pub fn update_rule_priority(conn: &Connection, company: CompanyId, rule_id: i64, priority: i64) -> Result<BankRule> {
    let changed = conn.execute(
        "UPDATE bank_rules SET priority = ?1 WHERE company_id = ?2 AND id = ?3",
        params![priority, company, rule_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("BankRule", rule_id));
    }
    get_rule(conn, company, rule_id)
}

pub fn set_rule_active(conn: &Connection, company: CompanyId, rule_id: i64, active: bool) -> Result<BankRule> {
    let changed = conn.execute(
        "UPDATE bank_rules SET is_active = ?1 WHERE company_id = ?2 AND id = ?3",
        params![active, company, rule_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("BankRule", rule_id));
    }
    get_rule(conn, company, rule_id)
}

/// System rules are only removed when `force` is set
pub fn delete_rule(conn: &Connection, company: CompanyId, rule_id: i64, force: bool) -> Result<()> {
    let rule = get_rule(conn, company, rule_id)?;
    if rule.is_system_rule && !force {
        log::warn!("Refused to delete system rule {} '{}'", rule.id, rule.keyword);
        return Err(LedgerError::validation(format!(
            "Rule '{}' is a system rule; deactivate it instead",
            rule.keyword
        )));
    }
    conn.execute(
        "DELETE FROM bank_rules WHERE company_id = ?1 AND id = ?2",
        params![company, rule_id],
    )?;
    Ok(())
}

fn apply_rules(
    conn: &mut Connection,
    company: CompanyId,
    txn: &BankTransaction,
    rules: &[BankRule],
) -> Result<MatchResult> {
    let Some(rule) = select_rule(rules, &txn.description) else {
        log::debug!("Rules: no rule matches transaction {} '{}'", txn.id, txn.description);
        return Ok(MatchResult::unmatched());
    };
    log::debug!(
        "Rules: transaction {} matched rule {} '{}' (priority {})",
        txn.id,
        rule.id,
        rule.keyword,
        rule.priority
    );

    let booking = BankBooking {
        target_account_id: rule.target_account_id,
        description: render_description(rule.description_template.as_deref(), txn),
        reference: Some(format!("Auto-matched: {}", rule.keyword)),
        contact_id: rule.contact_id,
    };
    let entry = post_bank_match(conn, company, txn.id, &booking)?;

    Ok(MatchResult {
        matched: true,
        rule: Some(rule.clone()),
        journal_entry_id: Some(entry.id),
    })
}

/// Offer one bank transaction to the active rules
pub fn match_transaction(conn: &mut Connection, company: CompanyId, bank_transaction_id: i64) -> Result<MatchResult> {
    let txn = bank_import::get_transaction(conn, company, bank_transaction_id)?;
    if txn.status == TransactionStatus::Matched {
        return Err(LedgerError::AlreadyPosted(format!(
            "bank transaction {} is already matched",
            txn.id
        )));
    }
    let rules = load_active_rules(conn, company)?;
    apply_rules(conn, company, &txn, &rules)
}

/// Offer every unmatched bank transaction to the active rules
pub fn match_unmatched(conn: &mut Connection, company: CompanyId) -> Result<MatchSummary> {
    let rules = load_active_rules(conn, company)?;
    let pending = bank_import::list_transactions(conn, company, Some(TransactionStatus::Unmatched))?;
    let mut summary = MatchSummary::default();

    for txn in &pending {
        summary.examined += 1;
        match apply_rules(conn, company, txn, &rules) {
            Ok(result) if result.matched => summary.matched += 1,
            Ok(_) => {}
            Err(e) => {
                log::warn!("Rules: matching transaction {} failed: {}", txn.id, e);
                summary.errors.push(format!("transaction {}: {}", txn.id, e));
            }
        }
    }

    log::info!(
        "Rules: matched {} of {} unmatched transactions",
        summary.matched,
        summary.examined
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{account_id, seeded_connection, COMPANY};
    use crate::models::{EntryStatus, EntryType};
    use crate::posting;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn rule(id: i64, keyword: &str, match_type: MatchType, priority: i64, created_at: &str) -> BankRule {
        BankRule {
            id,
            company_id: 1,
            keyword: keyword.to_string(),
            match_type,
            target_account_id: 100 + id,
            contact_id: None,
            description_template: None,
            priority,
            is_active: true,
            is_system_rule: false,
            created_at: created_at.to_string(),
        }
    }

    fn insert_txn(conn: &Connection, bank: i64, amount_cents: i64, description: &str, fp: &str) -> i64 {
        conn.execute(
            "INSERT INTO bank_transactions (company_id, bank_account_id, transaction_date, description,
                                            amount, fingerprint, counterparty_name)
             VALUES (1, ?1, '2024-03-05', ?2, ?3, ?4, 'KPN B.V.')",
            params![bank, description, amount_cents, fp],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn new_rule(keyword: &str, target: i64, priority: i64) -> NewRule {
        NewRule {
            keyword: keyword.to_string(),
            match_type: MatchType::Contains,
            target_account_id: target,
            contact_id: None,
            description_template: None,
            priority,
            is_system_rule: false,
        }
    }

    #[test]
    fn test_contains_and_exact() {
        let contains = rule(1, "kpn", MatchType::Contains, 0, "2024-01-01");
        assert!(contains.matches("Incasso KPN B.V."));
        assert!(!contains.matches("Vodafone"));

        let exact = rule(2, " Spotify AB ", MatchType::Exact, 0, "2024-01-01");
        assert!(exact.matches("spotify ab"));
        assert!(!exact.matches("Spotify AB Stockholm"));
    }

    #[test]
    fn test_priority_beats_creation_order() {
        let mut rules = vec![
            rule(1, "kpn", MatchType::Contains, 1, "2024-01-01 10:00:00.000"),
            rule(2, "kpn", MatchType::Contains, 5, "2024-06-01 10:00:00.000"),
            rule(3, "kpn", MatchType::Contains, 5, "2024-02-01 10:00:00.000"),
        ];
        sort_rules(&mut rules);
        let selected = select_rule(&rules, "KPN factuur").unwrap();
        // highest priority, earliest created among equals
        assert_eq!(selected.id, 3);
    }

    #[test]
    fn test_select_skips_inactive() {
        let mut inactive = rule(1, "kpn", MatchType::Contains, 9, "2024-01-01");
        inactive.is_active = false;
        let rules = vec![inactive, rule(2, "kpn", MatchType::Contains, 0, "2024-01-01")];
        assert_eq!(select_rule(&rules, "kpn").map(|r| r.id), Some(2));
        assert!(select_rule(&rules, "ziggo").is_none());
    }

    #[test]
    fn test_load_active_rules_order() {
        let conn = seeded_connection();
        let target = account_id(&conn, "4100");
        for (keyword, priority, created_at) in [
            ("late-high", 5, "2024-06-01 00:00:00.000"),
            ("early-high", 5, "2024-01-01 00:00:00.000"),
            ("low", 1, "2023-01-01 00:00:00.000"),
        ] {
            conn.execute(
                "INSERT INTO bank_rules (company_id, keyword, match_type, target_account_id, priority, created_at)
                 VALUES (1, ?1, 'CONTAINS', ?2, ?3, ?4)",
                params![keyword, target, priority, created_at],
            )
            .unwrap();
        }
        let keywords: Vec<String> = load_active_rules(&conn, COMPANY)
            .unwrap()
            .into_iter()
            .map(|r| r.keyword)
            .collect();
        assert_eq!(keywords, vec!["early-high", "late-high", "low"]);
    }

    #[test]
    fn test_render_description() {
        let txn = BankTransaction {
            id: 1,
            company_id: 1,
            bank_account_id: 1,
            transaction_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            description: "Incasso 12345".to_string(),
            amount: Decimal::from(-30),
            fingerprint: "x".to_string(),
            counterparty_name: Some("KPN B.V.".to_string()),
            counterparty_iban: None,
            reference: None,
            status: TransactionStatus::Unmatched,
            journal_entry_id: None,
        };
        assert_eq!(
            render_description(Some("Telefoon {counterparty} {date}"), &txn),
            "Telefoon KPN B.V. 2024-03-05"
        );
        assert_eq!(render_description(Some("  "), &txn), "Incasso 12345");
        assert_eq!(render_description(None, &txn), "Incasso 12345");
    }

    #[test]
    fn test_match_transaction_creates_draft_entry() {
        let mut conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let telefoon = account_id(&conn, "4100");
        let mut data = new_rule("kpn", telefoon, 10);
        data.description_template = Some("Telefoon {counterparty}".to_string());
        create_rule(&conn, COMPANY, &data).unwrap();

        let txn_id = insert_txn(&conn, bank, -3025, "Incasso KPN maart", "fp-1");
        let result = match_transaction(&mut conn, COMPANY, txn_id).unwrap();
        assert!(result.matched);

        let entry = posting::load_entry(&conn, COMPANY, result.journal_entry_id.unwrap()).unwrap();
        assert_eq!(entry.status, EntryStatus::Draft);
        assert_eq!(entry.entry_type, EntryType::BankMatch);
        assert_eq!(entry.description, "Telefoon KPN B.V.");
        assert_eq!(entry.reference.as_deref(), Some("Auto-matched: kpn"));
        assert!(entry.is_balanced());
        // money out: Dr target, Cr bank
        assert_eq!(entry.lines[0].account_id, telefoon);
        assert_eq!(entry.lines[0].debit, Decimal::new(3025, 2));
        assert_eq!(entry.lines[1].account_id, bank);
        assert_eq!(entry.lines[1].credit, Decimal::new(3025, 2));

        let txn = bank_import::get_transaction(&conn, COMPANY, txn_id).unwrap();
        assert_eq!(txn.status, TransactionStatus::Matched);
        assert_eq!(txn.journal_entry_id, Some(entry.id));

        assert!(matches!(
            match_transaction(&mut conn, COMPANY, txn_id),
            Err(LedgerError::AlreadyPosted(_))
        ));
    }

    #[test]
    fn test_no_match_leaves_row_unmatched() {
        let mut conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let txn_id = insert_txn(&conn, bank, -999, "Spotify AB", "fp-2");
        let result = match_transaction(&mut conn, COMPANY, txn_id).unwrap();
        assert!(!result.matched);
        assert!(result.journal_entry_id.is_none());
        let txn = bank_import::get_transaction(&conn, COMPANY, txn_id).unwrap();
        assert_eq!(txn.status, TransactionStatus::Unmatched);
    }

    #[test]
    fn test_match_unmatched() {
        let mut conn = seeded_connection();
        let bank = account_id(&conn, "1100");
        let telefoon = account_id(&conn, "4100");
        let omzet = account_id(&conn, "8000");
        create_rule(&conn, COMPANY, &new_rule("kpn", telefoon, 0)).unwrap();
        create_rule(&conn, COMPANY, &new_rule("factuur", omzet, 0)).unwrap();
        insert_txn(&conn, bank, -3025, "KPN", "fp-a");
        insert_txn(&conn, bank, 150000, "Betaling factuur 17", "fp-b");
        insert_txn(&conn, bank, -500, "Parkeren", "fp-c");

        let summary = match_unmatched(&mut conn, COMPANY).unwrap();
        assert_eq!(summary.examined, 3);
        assert_eq!(summary.matched, 2);
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn test_rule_admin() {
        let conn = seeded_connection();
        let telefoon = account_id(&conn, "4100");
        let mut data = new_rule("ziggo", telefoon, 0);
        data.is_system_rule = true;
        let created = create_rule(&conn, COMPANY, &data).unwrap();

        let updated = update_rule_priority(&conn, COMPANY, created.id, 7).unwrap();
        assert_eq!(updated.priority, 7);
        let inactive = set_rule_active(&conn, COMPANY, created.id, false).unwrap();
        assert!(!inactive.is_active);
        assert!(list_rules(&conn, COMPANY, false).unwrap().is_empty());
        assert_eq!(list_rules(&conn, COMPANY, true).unwrap().len(), 1);

        assert!(matches!(
            delete_rule(&conn, COMPANY, created.id, false),
            Err(LedgerError::Validation(_))
        ));
        delete_rule(&conn, COMPANY, created.id, true).unwrap();
        assert!(matches!(
            get_rule(&conn, COMPANY, created.id),
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[test]
    fn test_create_rule_requires_active_target() {
        let conn = seeded_connection();
        let telefoon = account_id(&conn, "4100");
        conn.execute("UPDATE accounts SET is_active = 0 WHERE id = ?1", [telefoon]).unwrap();
        assert!(matches!(
            create_rule(&conn, COMPANY, &new_rule("kpn", telefoon, 0)),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            create_rule(&conn, COMPANY, &new_rule("  ", telefoon, 0)),
            Err(LedgerError::Validation(_))
        ));
    }
}
