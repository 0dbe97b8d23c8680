//! Source documents: invoices, fixed assets and trips

use super::with_connection;
use crate::assets::{self, NewFixedAsset};
use crate::invoices::intake::{self, EnhancedInvoiceData};
use crate::invoices;
use crate::mileage::{self, NewTrip};
use crate::models::{CompanyId, FixedAsset, Invoice, InvoiceDirection, InvoiceStatus, MileageLog};

pub fn get_invoices(
    company_id: i64,
    direction: Option<InvoiceDirection>,
    status: Option<InvoiceStatus>,
) -> Result<Vec<Invoice>, String> {
    with_connection(|conn| invoices::list_invoices(conn, CompanyId(company_id), direction, status))
}

/// Turn an AI extraction result into a Draft purchase invoice
pub fn create_purchase_from_extraction(
    company_id: i64,
    data: EnhancedInvoiceData,
    contact_id: Option<i64>,
) -> Result<Invoice, String> {
    with_connection(|conn| intake::draft_purchase_from_extraction(conn, CompanyId(company_id), &data, contact_id))
}

pub fn create_fixed_asset(company_id: i64, data: NewFixedAsset) -> Result<FixedAsset, String> {
    with_connection(|conn| assets::create_fixed_asset(conn, CompanyId(company_id), &data))
}

pub fn get_fixed_assets(company_id: i64) -> Result<Vec<FixedAsset>, String> {
    with_connection(|conn| assets::list_active_assets(conn, CompanyId(company_id)))
}

pub fn log_mileage_trip(company_id: i64, trip: NewTrip) -> Result<MileageLog, String> {
    with_connection(|conn| mileage::log_trip(conn, CompanyId(company_id), &trip))
}

pub fn get_unbooked_trips(company_id: i64) -> Result<Vec<MileageLog>, String> {
    with_connection(|conn| mileage::unbooked_logs(conn, CompanyId(company_id)))
}
