//! Straight-line depreciation of fixed assets.
//!
//! One posting per asset per calendar month, dated on the last day of the
//! month. The monthly amount is constant; the final month takes whatever is
//! left so the asset ends exactly on its residual value.

use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{begin_posting, is_constraint_violation, load_entry, write_entry, JournalBuilder};
use crate::assets;
use crate::error::{LedgerError, Result};
use crate::models::{to_cents, CompanyId, EntryType, JournalEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepreciationStatus {
    Posted,
    AlreadyPosted,
    /// Nothing to post: fully depreciated or not yet in use
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepreciationOutcome {
    pub asset_id: i64,
    pub asset_name: String,
    pub status: DepreciationStatus,
    pub journal_entry_id: Option<i64>,
    pub amount: Option<Decimal>,
    pub message: Option<String>,
}

/// First and last day of the month containing `date`
pub fn month_bounds(date: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let invalid = || LedgerError::validation(format!("Invalid period {}", date));
    let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).ok_or_else(invalid)?;
    let next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    };
    let end = next.and_then(|n| n.pred_opt()).ok_or_else(invalid)?;
    Ok((start, end))
}

/// Accepts `YYYY-MM` or a full date inside the period
pub fn parse_period(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| LedgerError::validation(format!("Invalid period '{}', expected YYYY-MM", raw)))
}

/// Post one month of depreciation for `asset_id`
pub fn run_depreciation(
    conn: &mut Connection,
    company: CompanyId,
    asset_id: i64,
    period: NaiveDate,
) -> Result<JournalEntry> {
    let (start, end) = month_bounds(period)?;
    let period_key = start.format("%Y-%m").to_string();
    let tx = begin_posting(conn)?;

    let asset = assets::get_asset(&tx, company, asset_id)?;
    if !asset.is_active {
        return Err(LedgerError::validation(format!("Asset '{}' is disposed", asset.name)));
    }
    if let Some(last) = asset.last_depreciation_date {
        if last >= start {
            return Err(LedgerError::AlreadyPosted(format!(
                "depreciation of '{}' is booked up to {}",
                asset.name, last
            )));
        }
    }
    if end < asset.purchase_date {
        return Err(LedgerError::validation(format!(
            "Asset '{}' was bought on {}, after period {}",
            asset.name, asset.purchase_date, period_key
        )));
    }
    let remaining = asset.remaining_depreciation();
    if remaining <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "Asset '{}' is fully depreciated",
            asset.name
        )));
    }

    let monthly = asset.monthly_depreciation();
    let final_month = asset.months_depreciated + 1 >= asset.lifespan_months || monthly >= remaining;
    let amount = if final_month { remaining } else { monthly };

    let claimed = tx.execute(
        "UPDATE fixed_assets
         SET last_depreciation_date = ?1,
             accumulated_depreciation = accumulated_depreciation + ?2,
             months_depreciated = months_depreciated + 1
         WHERE company_id = ?3 AND id = ?4
           AND (last_depreciation_date IS NULL OR last_depreciation_date < ?5)",
        params![end, to_cents(amount)?, company, asset.id, start],
    )?;
    if claimed == 0 {
        return Err(LedgerError::AlreadyPosted(format!(
            "depreciation of '{}' for {} is already booked",
            asset.name, period_key
        )));
    }

    let description = format!("Afschrijving {} {}", asset.name, period_key);
    let mut builder =
        JournalBuilder::new(EntryType::Depreciation, end, description.clone()).reference(period_key.clone());
    builder.debit(asset.expense_account_id, amount, description.clone())?;
    builder.credit(asset.asset_account_id, amount, description)?;
    let entry_id = write_entry(&tx, company, &builder.build()?)?;

    tx.execute(
        "INSERT INTO asset_depreciations (asset_id, period, journal_entry_id, amount) VALUES (?1, ?2, ?3, ?4)",
        params![asset.id, period_key, entry_id, to_cents(amount)?],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            LedgerError::AlreadyPosted(format!(
                "depreciation of '{}' for {} is already booked",
                asset.name, period_key
            ))
        } else {
            LedgerError::Database(e)
        }
    })?;
    tx.commit()?;

    log::info!(
        "Posting: depreciation of '{}' for {}: {}{}",
        asset.name,
        period_key,
        amount,
        if final_month { " (final month)" } else { "" }
    );
    load_entry(conn, company, entry_id)
}

/// Depreciate every active asset for one period
pub fn run_depreciation_for_company(
    conn: &mut Connection,
    company: CompanyId,
    period: NaiveDate,
) -> Result<Vec<DepreciationOutcome>> {
    let active = assets::list_active_assets(conn, company)?;
    let mut outcomes = Vec::with_capacity(active.len());

    for asset in active {
        let mut outcome = DepreciationOutcome {
            asset_id: asset.id,
            asset_name: asset.name.clone(),
            status: DepreciationStatus::Posted,
            journal_entry_id: None,
            amount: None,
            message: None,
        };
        match run_depreciation(conn, company, asset.id, period) {
            Ok(entry) => {
                outcome.journal_entry_id = Some(entry.id);
                outcome.amount = Some(entry.total_debit());
            }
            Err(LedgerError::AlreadyPosted(message)) => {
                outcome.status = DepreciationStatus::AlreadyPosted;
                outcome.message = Some(message);
            }
            Err(LedgerError::Validation(message)) => {
                outcome.status = DepreciationStatus::Skipped;
                outcome.message = Some(message);
            }
            Err(e) => {
                log::warn!("Posting: depreciation of asset {} failed: {}", asset.id, e);
                outcome.status = DepreciationStatus::Failed;
                outcome.message = Some(e.to_string());
            }
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::test_support::laptop;
    use crate::assets::{create_fixed_asset, NewFixedAsset};
    use crate::db::test_support::{account_id, count, seeded_connection, COMPANY};
    use std::str::FromStr;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_month_bounds_and_period() {
        let (start, end) = month_bounds(NaiveDate::from_ymd_opt(2024, 2, 17).unwrap()).unwrap();
        assert_eq!(start, month(2024, 2));
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        let (_, december_end) = month_bounds(month(2024, 12)).unwrap();
        assert_eq!(december_end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());

        assert_eq!(parse_period("2024-03").unwrap(), month(2024, 3));
        assert_eq!(parse_period("2024-03-15").unwrap(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert!(parse_period("maart").is_err());
    }

    #[test]
    fn test_monthly_posting_and_rerun() {
        let mut conn = seeded_connection();
        let asset = laptop(&conn);

        let entry = run_depreciation(&mut conn, COMPANY, asset.id, month(2024, 1)).unwrap();
        assert_eq!(entry.entry_type, EntryType::Depreciation);
        assert_eq!(entry.entry_date, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(entry.lines[0].account_id, account_id(&conn, "4800"));
        assert_eq!(entry.lines[0].debit, dec("100.00"));
        assert_eq!(entry.lines[1].account_id, account_id(&conn, "0200"));
        assert_eq!(entry.lines[1].credit, dec("100.00"));

        assert!(matches!(
            run_depreciation(&mut conn, COMPANY, asset.id, month(2024, 1)),
            Err(LedgerError::AlreadyPosted(_))
        ));

        run_depreciation(&mut conn, COMPANY, asset.id, month(2024, 2)).unwrap();
        // an earlier period after a later one is also rejected
        assert!(matches!(
            run_depreciation(&mut conn, COMPANY, asset.id, month(2024, 1)),
            Err(LedgerError::AlreadyPosted(_))
        ));

        let updated = assets::get_asset(&conn, COMPANY, asset.id).unwrap();
        assert_eq!(updated.accumulated_depreciation, dec("200.00"));
        assert_eq!(updated.months_depreciated, 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM asset_depreciations"), 2);
    }

    #[test]
    fn test_final_month_lands_on_residual() {
        let mut conn = seeded_connection();
        let asset = create_fixed_asset(
            &conn,
            COMPANY,
            &NewFixedAsset {
                name: "Printer".to_string(),
                purchase_date: month(2024, 1),
                purchase_price: dec("1100"),
                residual_value: dec("100"),
                lifespan_months: 3,
                expense_account_id: account_id(&conn, "4800"),
                asset_account_id: account_id(&conn, "0200"),
            },
        )
        .unwrap();

        let amounts: Vec<Decimal> = (1..=3)
            .map(|m| run_depreciation(&mut conn, COMPANY, asset.id, month(2024, m)).unwrap().total_debit())
            .collect();
        assert_eq!(amounts, vec![dec("333.33"), dec("333.33"), dec("333.34")]);

        let done = assets::get_asset(&conn, COMPANY, asset.id).unwrap();
        assert_eq!(done.book_value(), dec("100.00"));
        assert!(matches!(
            run_depreciation(&mut conn, COMPANY, asset.id, month(2024, 4)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_period_before_purchase() {
        let mut conn = seeded_connection();
        let asset = laptop(&conn);
        assert!(matches!(
            run_depreciation(&mut conn, COMPANY, asset.id, month(2023, 12)),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM journal_entries"), 0);
    }

    #[test]
    fn test_company_run_reports_per_asset() {
        let mut conn = seeded_connection();
        let first = laptop(&conn);
        let second = laptop(&conn);
        run_depreciation(&mut conn, COMPANY, first.id, month(2024, 3)).unwrap();

        let outcomes = run_depreciation_for_company(&mut conn, COMPANY, month(2024, 3)).unwrap();
        assert_eq!(outcomes.len(), 2);
        let by_id = |id: i64| outcomes.iter().find(|o| o.asset_id == id).unwrap();
        assert_eq!(by_id(first.id).status, DepreciationStatus::AlreadyPosted);
        assert_eq!(by_id(second.id).status, DepreciationStatus::Posted);
        assert_eq!(by_id(second.id).amount, Some(dec("100.00")));
    }
}
