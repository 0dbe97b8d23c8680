use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::Row;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Amounts are persisted as integer cents
pub const AMOUNT_SCALE: u32 = 2;

/// Round to whole cents, half away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Whole cents of `value`; amounts outside the i64 range are rejected
pub fn to_cents(value: Decimal) -> Result<i64> {
    let mut rounded = round_money(value);
    rounded.rescale(AMOUNT_SCALE);
    if rounded.scale() != AMOUNT_SCALE {
        return Err(LedgerError::validation(format!("Amount {} is out of range", value)));
    }
    i64::try_from(rounded.mantissa())
        .map_err(|_| LedgerError::validation(format!("Amount {} is out of range", value)))
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, AMOUNT_SCALE)
}

fn cents_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    Ok(from_cents(row.get::<_, i64>(idx)?))
}

/// Quantities and unit prices keep their full precision as TEXT
fn decimal_text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse::<Decimal>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

macro_rules! db_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

/// Tenant scope threaded through every core call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub i64);

impl ToSql for CompanyId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl std::fmt::Display for CompanyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

db_enum!(AccountType {
    Asset => "ASSET",
    Liability => "LIABILITY",
    Equity => "EQUITY",
    Revenue => "REVENUE",
    Expense => "EXPENSE",
});

/// Dutch VAT tariffs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VatRate {
    Zero,
    Reduced,
    Standard,
}

impl VatRate {
    pub fn percent(&self) -> u32 {
        match self {
            Self::Zero => 0,
            Self::Reduced => 9,
            Self::Standard => 21,
        }
    }

    pub fn from_percent(percent: i64) -> Option<Self> {
        match percent {
            0 => Some(Self::Zero),
            9 => Some(Self::Reduced),
            21 => Some(Self::Standard),
            _ => None,
        }
    }

    /// VAT on a net amount, rounded to cents
    pub fn vat_on(&self, net: Decimal) -> Decimal {
        round_money(net * Decimal::from(self.percent()) / Decimal::ONE_HUNDRED)
    }
}

impl ToSql for VatRate {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.percent())))
    }
}

impl FromSql for VatRate {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let percent = value.as_i64()?;
        Self::from_percent(percent).ok_or(FromSqlError::OutOfRange(percent))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub company_id: i64,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub vat_rate: VatRate,
    pub tax_category: Option<String>,
    pub is_active: bool,
}

impl Account {
    pub const COLUMNS: &'static str =
        "id, company_id, code, name, account_type, vat_code, tax_category, is_active";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            code: row.get(2)?,
            name: row.get(3)?,
            account_type: row.get(4)?,
            vat_rate: row.get(5)?,
            tax_category: row.get(6)?,
            is_active: row.get(7)?,
        })
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.code, self.name)
    }
}

// =============================================================================
// Journal
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Sales,
    Purchase,
    Depreciation,
    Mileage,
    BankMatch,
    Manual,
    Reversal,
}

db_enum!(EntryType {
    Sales => "SALES",
    Purchase => "PURCHASE",
    Depreciation => "DEPRECIATION",
    Mileage => "MILEAGE",
    BankMatch => "BANK_MATCH",
    Manual => "MANUAL",
    Reversal => "REVERSAL",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Draft,
    Final,
}

db_enum!(EntryStatus {
    Draft => "DRAFT",
    Final => "FINAL",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: i64,
    pub uuid: String,
    pub company_id: i64,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub contact_id: Option<i64>,
    pub reverses_entry_id: Option<i64>,
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    pub const COLUMNS: &'static str = "id, uuid, company_id, entry_date, description, reference, \
         entry_type, status, contact_id, reverses_entry_id";

    /// Header only; lines are loaded separately
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uuid: row.get(1)?,
            company_id: row.get(2)?,
            entry_date: row.get(3)?,
            description: row.get(4)?,
            reference: row.get(5)?,
            entry_type: row.get(6)?,
            status: row.get(7)?,
            contact_id: row.get(8)?,
            reverses_entry_id: row.get(9)?,
            lines: Vec::new(),
        })
    }

    pub fn total_debit(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debit() == self.total_credit()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalLine {
    pub id: i64,
    pub entry_id: i64,
    pub position: i64,
    pub account_id: i64,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: String,
}

impl JournalLine {
    pub const COLUMNS: &'static str = "id, entry_id, position, account_id, debit, credit, description";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entry_id: row.get(1)?,
            position: row.get(2)?,
            account_id: row.get(3)?,
            debit: cents_at(row, 4)?,
            credit: cents_at(row, 5)?,
            description: row.get(6)?,
        })
    }
}

// =============================================================================
// Invoices
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceDirection {
    Sales,
    Purchase,
}

db_enum!(InvoiceDirection {
    Sales => "SALES",
    Purchase => "PURCHASE",
});

/// `Sent` means sent to the customer for sales invoices and booked but
/// pending payment for purchase invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
}

db_enum!(InvoiceStatus {
    Draft => "DRAFT",
    Sent => "SENT",
    Paid => "PAID",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: i64,
    pub company_id: i64,
    pub direction: InvoiceDirection,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub contact_id: Option<i64>,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub status: InvoiceStatus,
    pub journal_entry_id: Option<i64>,
    pub lines: Vec<InvoiceLine>,
}

impl Invoice {
    pub const COLUMNS: &'static str = "id, company_id, direction, invoice_number, invoice_date, \
         due_date, contact_id, subtotal, vat_amount, total_amount, status, journal_entry_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            direction: row.get(2)?,
            invoice_number: row.get(3)?,
            invoice_date: row.get(4)?,
            due_date: row.get(5)?,
            contact_id: row.get(6)?,
            subtotal: cents_at(row, 7)?,
            vat_amount: cents_at(row, 8)?,
            total_amount: cents_at(row, 9)?,
            status: row.get(10)?,
            journal_entry_id: row.get(11)?,
            lines: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub id: i64,
    pub invoice_id: i64,
    pub position: i64,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: VatRate,
    pub account_id: i64,
    pub amount: Decimal,
    pub vat_amount: Decimal,
}

impl InvoiceLine {
    pub const COLUMNS: &'static str = "id, invoice_id, position, description, quantity, unit_price, \
         vat_rate, account_id, amount, vat_amount";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            invoice_id: row.get(1)?,
            position: row.get(2)?,
            description: row.get(3)?,
            quantity: decimal_text_at(row, 4)?,
            unit_price: decimal_text_at(row, 5)?,
            vat_rate: row.get(6)?,
            account_id: row.get(7)?,
            amount: cents_at(row, 8)?,
            vat_amount: cents_at(row, 9)?,
        })
    }
}

// =============================================================================
// Bank
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Unmatched,
    Matched,
}

db_enum!(TransactionStatus {
    Unmatched => "UNMATCHED",
    Matched => "MATCHED",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTransaction {
    pub id: i64,
    pub company_id: i64,
    pub bank_account_id: i64,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub fingerprint: String,
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<String>,
    pub reference: Option<String>,
    pub status: TransactionStatus,
    pub journal_entry_id: Option<i64>,
}

impl BankTransaction {
    pub const COLUMNS: &'static str = "id, company_id, bank_account_id, transaction_date, \
         description, amount, fingerprint, counterparty_name, counterparty_iban, reference, \
         status, journal_entry_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            bank_account_id: row.get(2)?,
            transaction_date: row.get(3)?,
            description: row.get(4)?,
            amount: cents_at(row, 5)?,
            fingerprint: row.get(6)?,
            counterparty_name: row.get(7)?,
            counterparty_iban: row.get(8)?,
            reference: row.get(9)?,
            status: row.get(10)?,
            journal_entry_id: row.get(11)?,
        })
    }

    pub fn is_inflow(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Contains,
    Exact,
}

db_enum!(MatchType {
    Contains => "CONTAINS",
    Exact => "EXACT",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankRule {
    pub id: i64,
    pub company_id: i64,
    pub keyword: String,
    pub match_type: MatchType,
    pub target_account_id: i64,
    pub contact_id: Option<i64>,
    pub description_template: Option<String>,
    pub priority: i64,
    pub is_active: bool,
    pub is_system_rule: bool,
    pub created_at: String,
}

impl BankRule {
    pub const COLUMNS: &'static str = "id, company_id, keyword, match_type, target_account_id, \
         contact_id, description_template, priority, is_active, is_system_rule, created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            keyword: row.get(2)?,
            match_type: row.get(3)?,
            target_account_id: row.get(4)?,
            contact_id: row.get(5)?,
            description_template: row.get(6)?,
            priority: row.get(7)?,
            is_active: row.get(8)?,
            is_system_rule: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

// =============================================================================
// Fixed assets & mileage
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedAsset {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub purchase_date: NaiveDate,
    pub purchase_price: Decimal,
    pub residual_value: Decimal,
    pub lifespan_months: u32,
    pub expense_account_id: i64,
    pub asset_account_id: i64,
    pub last_depreciation_date: Option<NaiveDate>,
    pub accumulated_depreciation: Decimal,
    pub months_depreciated: u32,
    pub is_active: bool,
}

impl FixedAsset {
    pub const COLUMNS: &'static str = "id, company_id, name, purchase_date, purchase_price, \
         residual_value, lifespan_months, expense_account_id, asset_account_id, \
         last_depreciation_date, accumulated_depreciation, months_depreciated, is_active";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            name: row.get(2)?,
            purchase_date: row.get(3)?,
            purchase_price: cents_at(row, 4)?,
            residual_value: cents_at(row, 5)?,
            lifespan_months: row.get(6)?,
            expense_account_id: row.get(7)?,
            asset_account_id: row.get(8)?,
            last_depreciation_date: row.get(9)?,
            accumulated_depreciation: cents_at(row, 10)?,
            months_depreciated: row.get(11)?,
            is_active: row.get(12)?,
        })
    }

    pub fn depreciable_base(&self) -> Decimal {
        self.purchase_price - self.residual_value
    }

    /// Straight-line monthly amount, rounded to cents
    pub fn monthly_depreciation(&self) -> Decimal {
        if self.lifespan_months == 0 {
            return Decimal::ZERO;
        }
        round_money(self.depreciable_base() / Decimal::from(self.lifespan_months))
    }

    pub fn remaining_depreciation(&self) -> Decimal {
        self.depreciable_base() - self.accumulated_depreciation
    }

    pub fn book_value(&self) -> Decimal {
        self.purchase_price - self.accumulated_depreciation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileageLog {
    pub id: i64,
    pub company_id: i64,
    pub trip_date: NaiveDate,
    pub distance_km: Decimal,
    pub description: String,
    pub is_booked: bool,
    pub journal_entry_id: Option<i64>,
}

impl MileageLog {
    pub const COLUMNS: &'static str =
        "id, company_id, trip_date, distance_km, description, is_booked, journal_entry_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            trip_date: row.get(2)?,
            distance_km: decimal_text_at(row, 3)?,
            description: row.get(4)?,
            is_booked: row.get(5)?,
            journal_entry_id: row.get(6)?,
        })
    }
}
