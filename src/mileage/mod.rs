//! Business trips driven with a private car.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::{CompanyId, MileageLog};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrip {
    pub trip_date: NaiveDate,
    pub distance_km: Decimal,
    pub description: String,
}

pub fn log_trip(conn: &Connection, company: CompanyId, trip: &NewTrip) -> Result<MileageLog> {
    if trip.distance_km <= Decimal::ZERO {
        return Err(LedgerError::validation("Distance must be positive"));
    }
    conn.execute(
        "INSERT INTO mileage_logs (company_id, trip_date, distance_km, description)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            company,
            trip.trip_date,
            trip.distance_km.normalize().to_string(),
            trip.description.trim()
        ],
    )?;
    get_log(conn, company, conn.last_insert_rowid())
}

pub fn get_log(conn: &Connection, company: CompanyId, log_id: i64) -> Result<MileageLog> {
    let sql = format!(
        "SELECT {} FROM mileage_logs WHERE company_id = ?1 AND id = ?2",
        MileageLog::COLUMNS
    );
    conn.query_row(&sql, params![company, log_id], MileageLog::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("MileageLog", log_id))
}

pub fn unbooked_logs(conn: &Connection, company: CompanyId) -> Result<Vec<MileageLog>> {
    let sql = format!(
        "SELECT {} FROM mileage_logs WHERE company_id = ?1 AND is_booked = 0 ORDER BY trip_date, id",
        MileageLog::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let logs = stmt
        .query_map([company], MileageLog::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(logs)
}
