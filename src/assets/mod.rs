//! Fixed asset register.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::accounts;
use crate::error::{LedgerError, Result};
use crate::models::{round_money, to_cents, AccountType, CompanyId, FixedAsset};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFixedAsset {
    pub name: String,
    pub purchase_date: NaiveDate,
    pub purchase_price: Decimal,
    pub residual_value: Decimal,
    pub lifespan_months: u32,
    pub expense_account_id: i64,
    pub asset_account_id: i64,
}

pub fn create_fixed_asset(conn: &Connection, company: CompanyId, data: &NewFixedAsset) -> Result<FixedAsset> {
    let name = data.name.trim();
    if name.is_empty() {
        return Err(LedgerError::validation("Asset name is required"));
    }
    if data.lifespan_months == 0 {
        return Err(LedgerError::validation("Lifespan must be at least one month"));
    }
    let price = round_money(data.purchase_price);
    let residual = round_money(data.residual_value);
    if price <= Decimal::ZERO || residual < Decimal::ZERO || residual >= price {
        return Err(LedgerError::validation(format!(
            "Residual value {} must lie between zero and the purchase price {}",
            residual, price
        )));
    }

    let expense = accounts::require_active(conn, company, data.expense_account_id)?;
    if expense.account_type != AccountType::Expense {
        return Err(LedgerError::validation(format!(
            "Depreciation account {} is not an expense account",
            expense.label()
        )));
    }
    let asset_account = accounts::require_active(conn, company, data.asset_account_id)?;
    if asset_account.account_type != AccountType::Asset {
        return Err(LedgerError::validation(format!(
            "Account {} is not an asset account",
            asset_account.label()
        )));
    }

    conn.execute(
        "INSERT INTO fixed_assets (company_id, name, purchase_date, purchase_price, residual_value,
                                   lifespan_months, expense_account_id, asset_account_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            company,
            name,
            data.purchase_date,
            to_cents(price)?,
            to_cents(residual)?,
            data.lifespan_months,
            data.expense_account_id,
            data.asset_account_id
        ],
    )?;
    let asset = get_asset(conn, company, conn.last_insert_rowid())?;
    log::info!(
        "Registered asset '{}' ({} over {} months, {} per month)",
        asset.name,
        asset.purchase_price,
        asset.lifespan_months,
        asset.monthly_depreciation()
    );
    Ok(asset)
}

pub fn get_asset(conn: &Connection, company: CompanyId, asset_id: i64) -> Result<FixedAsset> {
    let sql = format!(
        "SELECT {} FROM fixed_assets WHERE company_id = ?1 AND id = ?2",
        FixedAsset::COLUMNS
    );
    conn.query_row(&sql, params![company, asset_id], FixedAsset::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("FixedAsset", asset_id))
}

pub fn list_active_assets(conn: &Connection, company: CompanyId) -> Result<Vec<FixedAsset>> {
    let sql = format!(
        "SELECT {} FROM fixed_assets WHERE company_id = ?1 AND is_active = 1 ORDER BY purchase_date, id",
        FixedAsset::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let assets = stmt
        .query_map([company], FixedAsset::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(assets)
}

/// Take an asset out of service; it is skipped by later depreciation runs
pub fn dispose_asset(conn: &Connection, company: CompanyId, asset_id: i64) -> Result<FixedAsset> {
    let changed = conn.execute(
        "UPDATE fixed_assets SET is_active = 0 WHERE company_id = ?1 AND id = ?2",
        params![company, asset_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("FixedAsset", asset_id));
    }
    get_asset(conn, company, asset_id)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{account_id, seeded_connection, COMPANY};

    #[test]
    fn test_create_and_list() {
        let conn = seeded_connection();
        let asset = test_support::laptop(&conn);
        assert_eq!(asset.monthly_depreciation(), Decimal::from(100));
        assert_eq!(asset.book_value(), Decimal::from(3600));
        assert_eq!(list_active_assets(&conn, COMPANY).unwrap().len(), 1);

        dispose_asset(&conn, COMPANY, asset.id).unwrap();
        assert!(list_active_assets(&conn, COMPANY).unwrap().is_empty());
    }

    #[test]
    fn test_create_validates_accounts_and_values() {
        let conn = seeded_connection();
        let mut data = NewFixedAsset {
            name: "Bureau".to_string(),
            purchase_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            purchase_price: Decimal::from(1000),
            residual_value: Decimal::from(1000),
            lifespan_months: 60,
            expense_account_id: account_id(&conn, "4800"),
            asset_account_id: account_id(&conn, "0200"),
        };
        assert!(create_fixed_asset(&conn, COMPANY, &data).is_err());

        data.residual_value = Decimal::from(100);
        data.asset_account_id = account_id(&conn, "4000");
        assert!(matches!(
            create_fixed_asset(&conn, COMPANY, &data),
            Err(LedgerError::Validation(_))
        ));

        data.asset_account_id = account_id(&conn, "0200");
        data.lifespan_months = 0;
        assert!(create_fixed_asset(&conn, COMPANY, &data).is_err());
    }
}
