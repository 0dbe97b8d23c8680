//! Command-line front end for the ledger core.
//!
//! Every subcommand goes through the `commands` facade on the shared
//! connection, the same entry points an outer UI layer uses.
//!
//! Run with: cargo run --bin ledger-cli -- <command>

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;

use ledger_core::accounts::system::SystemRole;
use ledger_core::accounts::NewAccount;
use ledger_core::assets::NewFixedAsset;
use ledger_core::commands::{accounts, bank, documents, ledger, rules};
use ledger_core::config::AppConfig;
use ledger_core::db;
use ledger_core::invoices::intake::EnhancedInvoiceData;
use ledger_core::mileage::NewTrip;
use ledger_core::models::{AccountType, EntryStatus, InvoiceDirection, InvoiceStatus, MatchType, VatRate};
use ledger_core::posting::{PaymentDisposition, TrialBalance};
use ledger_core::rules::NewRule;

#[derive(Parser)]
#[command(name = "ledger-cli")]
#[command(about = "Bank reconciliation and posting for sole-proprietor bookkeeping")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ./ledger-core.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file, overrides the configuration
    #[arg(long)]
    database: Option<PathBuf>,

    /// Company to work on, overrides the configuration
    #[arg(long)]
    company: Option<i64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,

    /// List the chart of accounts
    Accounts {
        /// Include inactive accounts
        #[arg(long)]
        all: bool,
    },

    /// Add an account to the chart
    AddAccount {
        code: String,
        name: String,
        /// ASSET, LIABILITY, EQUITY, REVENUE or EXPENSE
        #[arg(long = "type")]
        account_type: AccountType,
        /// VAT percentage (0, 9 or 21)
        #[arg(long, default_value_t = 0)]
        vat: i64,
    },

    /// Import a bank statement (MT940, CAMT.053, CSV or PDF)
    Import {
        /// Statement file
        file: PathBuf,
        /// Code of the bank account the statement belongs to, e.g. 1100
        #[arg(long)]
        account: String,
        /// Skip format detection (mt940, camt053, csv, pdf)
        #[arg(long)]
        format: Option<String>,
        /// Do not run the bank rules over the new rows
        #[arg(long)]
        no_match: bool,
    },

    /// List bank transactions
    Transactions {
        /// UNMATCHED, MATCHED or BOOKED
        #[arg(long)]
        status: Option<String>,
    },

    /// List earlier statement imports
    Imports,

    /// List the known bank CSV layouts
    Templates,

    /// Run the bank rules over all unmatched transactions
    Match,

    /// Book one bank transaction against an account
    Book {
        transaction: i64,
        /// Counter account code
        #[arg(long)]
        account: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// List bank rules
    Rules {
        /// Include inactive rules
        #[arg(long)]
        all: bool,
    },

    /// Add a bank rule
    AddRule {
        keyword: String,
        /// Target account code
        #[arg(long)]
        account: String,
        /// Match the whole description instead of a substring
        #[arg(long)]
        exact: bool,
        /// Description template for the booked entry
        #[arg(long)]
        template: Option<String>,
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },

    /// Enable or disable a bank rule
    SetRuleActive {
        rule: i64,
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },

    /// Delete a bank rule
    DeleteRule {
        rule: i64,
        /// Also delete system rules
        #[arg(long)]
        force: bool,
    },

    /// List invoices
    Invoices {
        /// SALES or PURCHASE
        #[arg(long)]
        direction: Option<InvoiceDirection>,
        /// DRAFT, SENT or PAID
        #[arg(long)]
        status: Option<InvoiceStatus>,
    },

    /// Draft a purchase invoice from an extraction result (JSON)
    Intake {
        file: PathBuf,
        #[arg(long)]
        contact: Option<i64>,
    },

    /// Post a Draft sales invoice
    FinalizeInvoice { invoice: i64 },

    /// Post a Draft purchase invoice
    BookPurchase {
        invoice: i64,
        /// Already paid via CASH or PRIVATE; unpaid when omitted
        #[arg(long)]
        paid_via: Option<String>,
    },

    /// List active fixed assets
    Assets,

    /// Register a fixed asset
    AddAsset {
        name: String,
        /// Purchase date, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        price: Decimal,
        #[arg(long, default_value_t = Decimal::ZERO)]
        residual: Decimal,
        /// Lifespan in months
        #[arg(long)]
        months: u32,
        /// Depreciation expense account code
        #[arg(long)]
        expense: String,
        /// Balance sheet account code
        #[arg(long)]
        account: String,
    },

    /// Depreciate all active assets for a month
    Depreciate {
        /// Period as YYYY-MM
        period: String,
    },

    /// Log a business trip
    Trip {
        /// Trip date, YYYY-MM-DD
        date: NaiveDate,
        /// Distance in km
        km: Decimal,
        description: String,
    },

    /// List trips not yet reimbursed
    Trips,

    /// Book all unbooked trips as a mileage reimbursement
    Mileage {
        /// Entry date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Rate per kilometre, overrides the configuration
        #[arg(long)]
        rate: Option<String>,
    },

    /// List journal entries
    Entries {
        /// DRAFT or FINAL
        #[arg(long)]
        status: Option<EntryStatus>,
    },

    /// Finalize a Draft journal entry
    Finalize { entry: i64 },

    /// Discard a Draft journal entry and release what it booked
    Discard { entry: i64 },

    /// Reverse a Final journal entry
    Reverse {
        entry: i64,
        /// Reversal date (default: today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Show the account a system role resolves to
    ResolveAccount {
        /// Role, e.g. VAT_PAYABLE or CASH
        role: String,
    },

    /// Bind a system role to an account
    BindAccount {
        /// Role, e.g. VAT_PAYABLE or CASH
        role: String,
        /// Account code
        code: String,
    },

    /// Remove the binding of a system role
    UnbindAccount { role: String },

    /// Bind every role the naming convention resolves unambiguously
    MigrateAccounts,

    /// Print debit and credit totals per account
    TrialBalance {
        /// Include draft entries
        #[arg(long)]
        include_drafts: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }
    if let Some(company) = cli.company {
        config.company_id = company;
    }

    db::init_database(&config.database_path)?;
    let company = config.company_id;

    match cli.command {
        Commands::Init => {
            println!("Database ready at {}", config.database_path.display());
        }
        Commands::Accounts { all } => print_json(&run(accounts::get_accounts(company, all))?)?,
        Commands::AddAccount {
            code,
            name,
            account_type,
            vat,
        } => {
            let vat_rate = VatRate::from_percent(vat).ok_or_else(|| anyhow!("VAT {}% is not a Dutch tariff", vat))?;
            let data = NewAccount {
                code,
                name,
                account_type,
                vat_rate,
                tax_category: None,
            };
            print_json(&run(accounts::create_account(company, data))?)?;
        }
        Commands::Import {
            file,
            account,
            format,
            no_match,
        } => {
            let bank_account = run(accounts::get_account_by_code(company, account))?;
            let result = run(bank::import_bank_statement(
                company,
                bank_account.id,
                file.display().to_string(),
                format,
                Some(config.auto_match && !no_match),
            ))?;
            print_json(&result)?;
        }
        Commands::Transactions { status } => print_json(&run(bank::get_bank_transactions(company, status))?)?,
        Commands::Imports => print_json(&run(bank::get_statement_imports(company))?)?,
        Commands::Templates => print_json(&bank::get_bank_templates())?,
        Commands::Match => print_json(&run(bank::match_unmatched_transactions(company))?)?,
        Commands::Book {
            transaction,
            account,
            description,
        } => {
            let counter = run(accounts::get_account_by_code(company, account))?;
            print_json(&run(bank::book_bank_transaction(company, transaction, counter.id, description))?)?;
        }
        Commands::Rules { all } => print_json(&run(rules::get_bank_rules(company, all))?)?,
        Commands::AddRule {
            keyword,
            account,
            exact,
            template,
            priority,
        } => {
            let target = run(accounts::get_account_by_code(company, account))?;
            let data = NewRule {
                keyword,
                match_type: if exact { MatchType::Exact } else { MatchType::Contains },
                target_account_id: target.id,
                contact_id: None,
                description_template: template,
                priority,
                is_system_rule: false,
            };
            print_json(&run(rules::create_bank_rule(company, data))?)?;
        }
        Commands::SetRuleActive { rule, active } => {
            print_json(&run(rules::set_bank_rule_active(company, rule, active))?)?
        }
        Commands::DeleteRule { rule, force } => {
            run(rules::delete_bank_rule(company, rule, Some(force)))?;
            println!("Deleted rule {}", rule);
        }
        Commands::Invoices { direction, status } => {
            print_json(&run(documents::get_invoices(company, direction, status))?)?
        }
        Commands::Intake { file, contact } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let data: EnhancedInvoiceData =
                serde_json::from_str(&raw).with_context(|| format!("Invalid extraction result in {}", file.display()))?;
            print_json(&run(documents::create_purchase_from_extraction(company, data, contact))?)?;
        }
        Commands::FinalizeInvoice { invoice } => print_json(&run(ledger::finalize_sales_invoice(company, invoice))?)?,
        Commands::BookPurchase { invoice, paid_via } => {
            let disposition = match paid_via {
                Some(raw) => PaymentDisposition::PaidVia(
                    SystemRole::parse(&raw).ok_or_else(|| anyhow!("Unknown system role '{}'", raw))?,
                ),
                None => PaymentDisposition::Unpaid,
            };
            print_json(&run(ledger::book_purchase_invoice(company, invoice, disposition))?)?;
        }
        Commands::Assets => print_json(&run(documents::get_fixed_assets(company))?)?,
        Commands::AddAsset {
            name,
            date,
            price,
            residual,
            months,
            expense,
            account,
        } => {
            let expense = run(accounts::get_account_by_code(company, expense))?;
            let asset_account = run(accounts::get_account_by_code(company, account))?;
            let data = NewFixedAsset {
                name,
                purchase_date: date,
                purchase_price: price,
                residual_value: residual,
                lifespan_months: months,
                expense_account_id: expense.id,
                asset_account_id: asset_account.id,
            };
            print_json(&run(documents::create_fixed_asset(company, data))?)?;
        }
        Commands::Depreciate { period } => print_json(&run(ledger::run_depreciation(company, period))?)?,
        Commands::Trip { date, km, description } => {
            let trip = NewTrip {
                trip_date: date,
                distance_km: km,
                description,
            };
            print_json(&run(documents::log_mileage_trip(company, trip))?)?;
        }
        Commands::Trips => print_json(&run(documents::get_unbooked_trips(company))?)?,
        Commands::Mileage { date, rate } => {
            let rate = rate.unwrap_or_else(|| config.mileage_rate.to_string());
            let date = date.unwrap_or_else(today);
            print_json(&run(ledger::run_mileage_reimbursement(company, rate, date))?)?;
        }
        Commands::Entries { status } => print_json(&run(ledger::get_journal_entries(company, status))?)?,
        Commands::Finalize { entry } => print_json(&run(ledger::finalize_journal_entry(company, entry))?)?,
        Commands::Discard { entry } => {
            run(ledger::discard_journal_entry(company, entry))?;
            println!("Discarded entry {}", entry);
        }
        Commands::Reverse {
            entry,
            date,
            description,
        } => {
            let date = date.unwrap_or_else(today);
            print_json(&run(ledger::reverse_journal_entry(company, entry, date, description))?)?;
        }
        Commands::ResolveAccount { role } => print_json(&run(accounts::resolve_system_account(company, role))?)?,
        Commands::BindAccount { role, code } => {
            let account = run(accounts::get_account_by_code(company, code))?;
            run(accounts::bind_system_account(company, role.clone(), account.id))?;
            println!("{} -> {}", role.to_ascii_uppercase(), account.label());
        }
        Commands::UnbindAccount { role } => {
            if run(accounts::unbind_system_account(company, role.clone()))? {
                println!("Removed binding for {}", role.to_ascii_uppercase());
            } else {
                println!("{} was not bound", role.to_ascii_uppercase());
            }
        }
        Commands::MigrateAccounts => print_json(&run(accounts::migrate_system_accounts(company))?)?,
        Commands::TrialBalance { include_drafts } => {
            print_trial_balance(&run(ledger::get_trial_balance(company, include_drafts))?);
        }
    }

    Ok(())
}

/// Facade errors are display strings
fn run<T>(result: std::result::Result<T, String>) -> Result<T> {
    result.map_err(|e| anyhow!(e))
}

fn today() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_trial_balance(tb: &TrialBalance) {
    println!("{:<8} {:<32} {:>12} {:>12}", "Code", "Account", "Debit", "Credit");
    for row in &tb.rows {
        println!("{:<8} {:<32} {:>12} {:>12}", row.code, row.name, row.debit, row.credit);
    }
    println!("{:<8} {:<32} {:>12} {:>12}", "", "Total", tb.total_debit, tb.total_credit);
    if !tb.is_balanced() {
        log::warn!("Trial balance does not balance");
    }
}
