//! Command facade for an outer UI or API layer.
//!
//! Every command takes plain ids and strings, runs against the shared
//! connection installed by `db::init_database` and reports failures as
//! display strings.

pub mod accounts;
pub mod bank;
pub mod documents;
pub mod ledger;
pub mod rules;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db;
use crate::error::LedgerError;

/// Run `f` on the shared connection
pub(crate) fn with_connection<T>(
    f: impl FnOnce(&mut Connection) -> crate::error::Result<T>,
) -> Result<T, String> {
    let mut conn_guard = db::get_connection().map_err(|e| e.to_string())?;
    let conn = conn_guard
        .as_mut()
        .ok_or_else(|| "Database not initialized".to_string())?;
    f(conn).map_err(|e| e.to_string())
}

pub(crate) fn parse_date(raw: &str) -> crate::error::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| LedgerError::validation(format!("Invalid date '{}', expected YYYY-MM-DD", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date(" 2024-03-31 ").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
        );
        assert!(matches!(parse_date("31-03-2024"), Err(LedgerError::Validation(_))));
    }

    fn new_account(code: &str, name: &str, account_type: crate::models::AccountType) -> crate::accounts::NewAccount {
        crate::accounts::NewAccount {
            code: code.to_string(),
            name: name.to_string(),
            account_type,
            vat_rate: crate::models::VatRate::Zero,
            tax_category: None,
        }
    }

    // the only test that installs the shared connection
    #[test]
    fn test_commands_on_shared_connection() {
        use crate::mileage::NewTrip;
        use crate::models::{AccountType, EntryStatus};
        use rust_decimal::Decimal;

        let dir = tempfile::tempdir().unwrap();
        db::init_database(&dir.path().join("ledger.db")).unwrap();

        let kas = accounts::create_account(1, new_account("1000", "Kas", AccountType::Asset)).unwrap();
        let reiskosten = accounts::create_account(1, new_account("4500", "Reiskosten", AccountType::Expense)).unwrap();
        accounts::create_account(1, new_account("0800", "Privé", AccountType::Equity)).unwrap();

        assert_eq!(accounts::get_account_by_code(1, " 4500 ".to_string()).unwrap().id, reiskosten.id);
        assert!(accounts::get_account_by_code(1, "9999".to_string())
            .unwrap_err()
            .contains("No account with code 9999"));
        assert_eq!(accounts::resolve_system_account(1, "cash".to_string()).unwrap().id, kas.id);
        assert!(accounts::bind_system_account(1, "bogus".to_string(), kas.id).is_err());
        assert!(!bank::get_bank_templates().is_empty());

        assert!(ledger::get_trial_balance(1, true).unwrap().rows.is_empty());
        assert!(ledger::run_mileage_reimbursement(1, "0,23".to_string(), "2024-03-31".to_string())
            .unwrap_err()
            .contains("no unbooked trips"));

        documents::log_mileage_trip(
            1,
            NewTrip {
                trip_date: NaiveDate::from_ymd_opt(2024, 3, 12).unwrap(),
                distance_km: Decimal::from(100),
                description: "Klant Utrecht".to_string(),
            },
        )
        .unwrap();
        assert_eq!(documents::get_unbooked_trips(1).unwrap().len(), 1);

        let entry = ledger::run_mileage_reimbursement(1, "0,23".to_string(), "2024-03-31".to_string()).unwrap();
        assert!(documents::get_unbooked_trips(1).unwrap().is_empty());
        assert_eq!(ledger::get_journal_entries(1, Some(EntryStatus::Final)).unwrap().len(), 1);

        let reversal = ledger::reverse_journal_entry(1, entry.id, "2024-04-01".to_string(), None).unwrap();
        assert_eq!(reversal.reverses_entry_id, Some(entry.id));
        assert_eq!(documents::get_unbooked_trips(1).unwrap().len(), 1);
        assert!(ledger::reverse_journal_entry(1, entry.id, "2024-04-01".to_string(), None).is_err());

        let tb = ledger::get_trial_balance(1, false).unwrap();
        assert!(tb.is_balanced());
        assert_eq!(tb.total_debit, Decimal::from(46));
    }
}
