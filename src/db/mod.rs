use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

pub static DB: once_cell::sync::Lazy<Mutex<Option<Connection>>> =
    once_cell::sync::Lazy::new(|| Mutex::new(None));

/// Open (or create) the ledger database and install it as the shared connection
pub fn init_database(path: &Path) -> Result<()> {
    let conn = open_database(path)?;
    *DB.lock()
        .map_err(|e| anyhow::anyhow!("Failed to lock database: {}", e))? = Some(conn);
    Ok(())
}

/// Open a database file with the schema applied, without touching the shared slot
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;

    // Enable WAL mode for better concurrent access
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    create_schema(&conn)?;

    log::info!("Opened ledger database at {}", path.display());
    Ok(conn)
}

pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- =============================================================================
        -- Chart of accounts
        -- =============================================================================

        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            account_type TEXT NOT NULL
                CHECK(account_type IN ('ASSET', 'LIABILITY', 'EQUITY', 'REVENUE', 'EXPENSE')),
            vat_code INTEGER NOT NULL DEFAULT 0 CHECK(vat_code IN (0, 9, 21)),
            tax_category TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(company_id, code)
        );

        -- Role -> account bindings for the system accounts
        CREATE TABLE IF NOT EXISTS system_account_bindings (
            company_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            account_id INTEGER NOT NULL,
            bound_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (company_id, role),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        -- =============================================================================
        -- Journal
        -- =============================================================================

        CREATE TABLE IF NOT EXISTS journal_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT UNIQUE NOT NULL,
            company_id INTEGER NOT NULL,
            entry_date TEXT NOT NULL,
            description TEXT NOT NULL,
            reference TEXT,
            entry_type TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('DRAFT', 'FINAL')),
            contact_id INTEGER,
            reverses_entry_id INTEGER UNIQUE,     -- at most one reversal per entry
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (reverses_entry_id) REFERENCES journal_entries(id)
        );

        -- Amounts in cents (scale 10^2); exactly one side is nonzero
        CREATE TABLE IF NOT EXISTS journal_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            account_id INTEGER NOT NULL,
            debit INTEGER NOT NULL DEFAULT 0,
            credit INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            CHECK(debit >= 0 AND credit >= 0),
            CHECK((debit = 0) <> (credit = 0)),
            FOREIGN KEY (entry_id) REFERENCES journal_entries(id) ON DELETE CASCADE,
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        -- =============================================================================
        -- Invoices
        -- =============================================================================

        CREATE TABLE IF NOT EXISTS invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL,
            direction TEXT NOT NULL CHECK(direction IN ('SALES', 'PURCHASE')),
            invoice_number TEXT NOT NULL,
            invoice_date TEXT NOT NULL,
            due_date TEXT,
            contact_id INTEGER,
            subtotal INTEGER NOT NULL,            -- scale: 10^2 (cents)
            vat_amount INTEGER NOT NULL,
            total_amount INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'DRAFT' CHECK(status IN ('DRAFT', 'SENT', 'PAID')),
            journal_entry_id INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(company_id, direction, invoice_number),
            FOREIGN KEY (journal_entry_id) REFERENCES journal_entries(id)
        );

        CREATE TABLE IF NOT EXISTS invoice_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            description TEXT NOT NULL,
            quantity TEXT NOT NULL,               -- decimal text, full precision
            unit_price TEXT NOT NULL,
            vat_rate INTEGER NOT NULL CHECK(vat_rate IN (0, 9, 21)),
            account_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,              -- scale: 10^2 (cents)
            vat_amount INTEGER NOT NULL,
            FOREIGN KEY (invoice_id) REFERENCES invoices(id) ON DELETE CASCADE,
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        -- =============================================================================
        -- Bank import
        -- =============================================================================

        -- Import history to track imported statement files
        CREATE TABLE IF NOT EXISTS statement_imports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL,
            bank_account_id INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            format TEXT NOT NULL,
            imported_at TEXT NOT NULL DEFAULT (datetime('now')),
            new_count INTEGER NOT NULL DEFAULT 0,
            duplicate_count INTEGER NOT NULL DEFAULT 0,
            skipped_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (bank_account_id) REFERENCES accounts(id)
        );

        CREATE TABLE IF NOT EXISTS bank_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL,
            bank_account_id INTEGER NOT NULL,
            transaction_date TEXT NOT NULL,
            description TEXT NOT NULL,
            amount INTEGER NOT NULL,              -- scale: 10^2 (cents), negative = money out
            fingerprint TEXT NOT NULL,
            counterparty_name TEXT,
            counterparty_iban TEXT,
            reference TEXT,
            status TEXT NOT NULL DEFAULT 'UNMATCHED' CHECK(status IN ('UNMATCHED', 'MATCHED')),
            journal_entry_id INTEGER,
            import_id INTEGER,
            imported_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(company_id, fingerprint),
            FOREIGN KEY (bank_account_id) REFERENCES accounts(id),
            FOREIGN KEY (journal_entry_id) REFERENCES journal_entries(id),
            FOREIGN KEY (import_id) REFERENCES statement_imports(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS bank_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL,
            keyword TEXT NOT NULL,
            match_type TEXT NOT NULL CHECK(match_type IN ('CONTAINS', 'EXACT')),
            target_account_id INTEGER NOT NULL,
            contact_id INTEGER,
            description_template TEXT,
            priority INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_system_rule INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            FOREIGN KEY (target_account_id) REFERENCES accounts(id)
        );

        -- =============================================================================
        -- Fixed assets & mileage
        -- =============================================================================

        CREATE TABLE IF NOT EXISTS fixed_assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            purchase_date TEXT NOT NULL,
            purchase_price INTEGER NOT NULL,      -- scale: 10^2 (cents)
            residual_value INTEGER NOT NULL DEFAULT 0,
            lifespan_months INTEGER NOT NULL CHECK(lifespan_months > 0),
            expense_account_id INTEGER NOT NULL,
            asset_account_id INTEGER NOT NULL,
            last_depreciation_date TEXT,
            accumulated_depreciation INTEGER NOT NULL DEFAULT 0,
            months_depreciated INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (expense_account_id) REFERENCES accounts(id),
            FOREIGN KEY (asset_account_id) REFERENCES accounts(id)
        );

        -- One posting per asset per period (YYYY-MM)
        CREATE TABLE IF NOT EXISTS asset_depreciations (
            asset_id INTEGER NOT NULL,
            period TEXT NOT NULL,
            journal_entry_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            PRIMARY KEY (asset_id, period),
            FOREIGN KEY (asset_id) REFERENCES fixed_assets(id),
            FOREIGN KEY (journal_entry_id) REFERENCES journal_entries(id)
        );

        CREATE TABLE IF NOT EXISTS mileage_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL,
            trip_date TEXT NOT NULL,
            distance_km TEXT NOT NULL,            -- decimal text
            description TEXT NOT NULL DEFAULT '',
            is_booked INTEGER NOT NULL DEFAULT 0,
            journal_entry_id INTEGER,
            FOREIGN KEY (journal_entry_id) REFERENCES journal_entries(id)
        );

        -- =============================================================================
        -- Indices
        -- =============================================================================

        CREATE INDEX IF NOT EXISTS idx_accounts_company ON accounts(company_id, is_active);
        CREATE INDEX IF NOT EXISTS idx_journal_entries_company_date ON journal_entries(company_id, entry_date);
        CREATE INDEX IF NOT EXISTS idx_journal_lines_entry ON journal_lines(entry_id);
        CREATE INDEX IF NOT EXISTS idx_journal_lines_account ON journal_lines(account_id);
        CREATE INDEX IF NOT EXISTS idx_invoices_company_status ON invoices(company_id, status);
        CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice ON invoice_lines(invoice_id);
        CREATE INDEX IF NOT EXISTS idx_bank_transactions_status ON bank_transactions(company_id, status);
        CREATE INDEX IF NOT EXISTS idx_bank_transactions_account ON bank_transactions(bank_account_id, transaction_date);
        CREATE INDEX IF NOT EXISTS idx_bank_rules_priority ON bank_rules(company_id, is_active, priority DESC);
        CREATE INDEX IF NOT EXISTS idx_mileage_logs_unbooked ON mileage_logs(company_id) WHERE is_booked = 0;
        "#,
    )
}

pub fn get_connection() -> Result<std::sync::MutexGuard<'static, Option<Connection>>> {
    DB.lock()
        .map_err(|e| anyhow::anyhow!("Failed to lock database: {}", e))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::CompanyId;
    use rusqlite::params;

    pub const COMPANY: CompanyId = CompanyId(1);

    /// Dutch sole-proprietor chart of accounts
    const CHART: &[(&str, &str, &str, i64)] = &[
        ("0200", "Inventaris", "ASSET", 0),
        ("0800", "Privé opnamen", "EQUITY", 0),
        ("1000", "Kas", "ASSET", 0),
        ("1100", "Bank ING", "ASSET", 0),
        ("1300", "Debiteuren", "ASSET", 0),
        ("1600", "Crediteuren", "LIABILITY", 0),
        ("1700", "Te betalen BTW", "LIABILITY", 0),
        ("1710", "Te vorderen BTW", "ASSET", 0),
        ("4000", "Kantoorkosten", "EXPENSE", 21),
        ("4100", "Telefoon en internet", "EXPENSE", 21),
        ("4500", "Reiskosten", "EXPENSE", 0),
        ("4800", "Afschrijvingskosten", "EXPENSE", 0),
        ("8000", "Omzet", "REVENUE", 21),
    ];

    pub fn seeded_connection() -> Connection {
        let conn = open_in_memory().unwrap();
        for (code, name, account_type, vat) in CHART {
            conn.execute(
                "INSERT INTO accounts (company_id, code, name, account_type, vat_code)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![COMPANY, code, name, account_type, vat],
            )
            .unwrap();
        }
        conn
    }

    pub fn account_id(conn: &Connection, code: &str) -> i64 {
        conn.query_row(
            "SELECT id FROM accounts WHERE company_id = ?1 AND code = ?2",
            params![COMPANY, code],
            |row| row.get(0),
        )
        .unwrap()
    }

    pub fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }
}
