use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::application::{
    BankConfig, BankService, CustomerDetails, RecoveryPolicy, StatusChange,
};
use crate::domain::{
    Account, AccountStatus, Currency, Customer, CustomerStatus, Transaction, format_cents,
    parse_cents,
};

/// bankcore - accounts, customers and money movement for a bank back office
#[derive(Parser)]
#[command(name = "bankcore")]
#[command(about = "Account balance ledger with atomic deposits, withdrawals and transfers")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(
        short,
        long,
        global = true,
        env = "BANKCORE_DATABASE",
        default_value = "bankcore.db"
    )]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Lookups made to learn the outcome of an unacknowledged commit
    #[arg(
        long,
        global = true,
        env = "BANKCORE_RECOVERY_ATTEMPTS",
        default_value_t = RecoveryPolicy::DEFAULT_MAX_ATTEMPTS
    )]
    pub recovery_attempts: u32,

    /// Pause between outcome lookups, in milliseconds
    #[arg(long, global = true, env = "BANKCORE_RECOVERY_BACKOFF_MS", default_value_t = 50)]
    pub recovery_backoff_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Customer management commands
    #[command(subcommand)]
    Customer(CustomerCommands),

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Credit an account
    Deposit {
        /// Account ID
        account: Uuid,

        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Debit an account
    Withdraw {
        /// Account ID
        account: Uuid,

        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Move money between two accounts
    Transfer {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Source account ID
        #[arg(long)]
        from: Uuid,

        /// Destination account ID
        #[arg(long)]
        to: Uuid,
    },

    /// List transactions
    Transactions {
        /// Only transactions touching this account
        #[arg(long)]
        account: Option<Uuid>,
    },

    /// Show one transaction
    #[command(name = "show")]
    ShowTransaction {
        /// Transaction ID
        id: Uuid,
    },

    /// Verify that balances match the transaction history
    Check,
}

#[derive(Subcommand)]
pub enum CustomerCommands {
    /// Register a new customer
    Create {
        name: String,

        #[arg(long)]
        city: Option<String>,

        #[arg(long)]
        zipcode: Option<String>,

        /// Status: active, inactive
        #[arg(long, default_value = "active")]
        status: String,
    },

    /// List all customers
    List,

    /// Show one customer and their accounts
    Show { id: Uuid },

    /// Replace a customer's details
    Update {
        id: Uuid,

        #[arg(long)]
        name: String,

        #[arg(long)]
        city: Option<String>,

        #[arg(long)]
        zipcode: Option<String>,

        /// Status: active, inactive
        #[arg(long, default_value = "active")]
        status: String,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open an account for a customer
    Create {
        /// Owning customer ID
        #[arg(long)]
        owner: Uuid,

        /// Currency code (e.g., USD, EUR)
        #[arg(short, long, default_value = "USD")]
        currency: String,

        /// Opening balance (e.g., "100.00")
        #[arg(short, long, default_value = "0")]
        balance: String,

        /// Status: active, inactive
        #[arg(long, default_value = "active")]
        status: String,
    },

    /// List all accounts
    List,

    /// Show one account
    Show { id: Uuid },

    /// List the accounts of a customer
    Owner { customer: Uuid },

    /// Soft delete an account (marks it inactive)
    Delete { id: Uuid },
}

impl Cli {
    /// Install the tracing subscriber. `RUST_LOG` wins over `--verbose`.
    pub fn init_logging(&self) {
        let default_level = if self.verbose { "bankcore=debug" } else { "warn" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    pub fn config(&self) -> BankConfig {
        BankConfig::default().with_recovery(RecoveryPolicy::new(
            self.recovery_attempts,
            Duration::from_millis(self.recovery_backoff_ms),
        ))
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();
        let json = self.json;

        if let Commands::Init = self.command {
            BankService::init(&self.database, config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = BankService::connect(&self.database, config)
            .await
            .with_context(|| {
                format!("Cannot open '{}'. Run `bankcore init` first", self.database)
            })?;

        match self.command {
            // Handled before connecting.
            Commands::Init => {}

            Commands::Customer(cmd) => run_customer_command(&service, cmd, json).await?,

            Commands::Account(cmd) => run_account_command(&service, cmd, json).await?,

            Commands::Deposit { account, amount } => {
                let amount = parse_amount(&amount)?;
                let tx = service.transactions().deposit(account, amount).await?;
                print_transaction_result(&tx, json)?;
            }

            Commands::Withdraw { account, amount } => {
                let amount = parse_amount(&amount)?;
                let tx = service.transactions().withdraw(account, amount).await?;
                print_transaction_result(&tx, json)?;
            }

            Commands::Transfer { amount, from, to } => {
                let amount = parse_amount(&amount)?;
                let tx = service
                    .transactions()
                    .create_transaction(from, Some(to), amount)
                    .await?;
                print_transaction_result(&tx, json)?;
            }

            Commands::Transactions { account } => {
                let transactions = match account {
                    Some(id) => service.transactions().transactions_for_account(id).await?,
                    None => service.transactions().list_transactions().await?,
                };
                if json {
                    print_json(&transactions)?;
                } else {
                    print_transaction_table(&transactions);
                }
            }

            Commands::ShowTransaction { id } => {
                let tx = service.transactions().get_transaction(id).await?;
                if json {
                    print_json(&tx)?;
                } else {
                    print_transaction_details(&tx);
                }
            }

            Commands::Check => {
                let report = service.check_integrity().await?;
                if json {
                    print_json(&report)?;
                } else {
                    println!("Checking ledger integrity...\n");
                    println!("Accounts:     {}", report.account_count);
                    println!("Transactions: {}", report.transaction_count);
                    println!("Total held:   {}", format_cents(report.total_balance));
                    println!();
                }

                if !report.is_healthy() {
                    if !json {
                        println!("Issues found:");
                        for issue in &report.issues {
                            println!("  - {}", issue);
                        }
                    }
                    anyhow::bail!("Ledger integrity check failed");
                }
                if !json {
                    println!("Ledger is consistent.");
                }
            }
        }

        Ok(())
    }
}

async fn run_customer_command(
    service: &BankService,
    cmd: CustomerCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        CustomerCommands::Create {
            name,
            city,
            zipcode,
            status,
        } => {
            let details = CustomerDetails {
                name,
                city,
                zipcode,
                status: parse_customer_status(&status)?,
            };
            let customer = service.customers().create_customer(details).await?;
            if json {
                print_json(&customer)?;
            } else {
                println!("Created customer: {} ({})", customer.name, customer.id);
            }
        }

        CustomerCommands::List => {
            let customers = service.customers().list_customers().await?;
            if json {
                print_json(&customers)?;
            } else if customers.is_empty() {
                println!("No customers found.");
            } else {
                println!(
                    "{:<36}  {:<24} {:<16} {:<8}",
                    "ID", "NAME", "CITY", "STATUS"
                );
                println!("{}", "-".repeat(88));
                for customer in customers {
                    println!(
                        "{:<36}  {:<24} {:<16} {:<8}",
                        customer.id,
                        truncate(&customer.name, 24),
                        truncate(customer.city.as_deref().unwrap_or("-"), 16),
                        customer.status
                    );
                }
            }
        }

        CustomerCommands::Show { id } => {
            let customer = service.customers().get_customer(id).await?;
            let accounts = service.accounts().accounts_for_owner(id).await?;
            if json {
                #[derive(Serialize)]
                struct CustomerView<'a> {
                    customer: &'a Customer,
                    accounts: &'a [Account],
                }
                print_json(&CustomerView {
                    customer: &customer,
                    accounts: &accounts,
                })?;
            } else {
                println!("Customer: {}", customer.name);
                println!("  ID:       {}", customer.id);
                println!("  City:     {}", customer.city.as_deref().unwrap_or("-"));
                println!("  Zipcode:  {}", customer.zipcode.as_deref().unwrap_or("-"));
                println!("  Status:   {}", customer.status);
                println!();
                print_account_table(&accounts);
            }
        }

        CustomerCommands::Update {
            id,
            name,
            city,
            zipcode,
            status,
        } => {
            let details = CustomerDetails {
                name,
                city,
                zipcode,
                status: parse_customer_status(&status)?,
            };
            let customer = service.customers().update_customer(id, details).await?;
            if json {
                print_json(&customer)?;
            } else {
                println!("Updated customer: {} ({})", customer.name, customer.id);
            }
        }
    }
    Ok(())
}

async fn run_account_command(
    service: &BankService,
    cmd: AccountCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        AccountCommands::Create {
            owner,
            currency,
            balance,
            status,
        } => {
            let currency: Currency = currency.parse()?;
            let balance = parse_cents(&balance).context("Invalid balance. Use '50.00' or '50'")?;
            let status = AccountStatus::from_str(&status).ok_or_else(|| {
                anyhow::anyhow!("Invalid status '{}'. Valid: active, inactive", status)
            })?;

            let account = service
                .accounts()
                .create_account(owner, currency, balance, status)
                .await?;
            if json {
                print_json(&account)?;
            } else {
                println!(
                    "Opened account {} with {} {}",
                    account.id,
                    format_cents(account.balance),
                    account.currency
                );
            }
        }

        AccountCommands::List => {
            let accounts = service.accounts().list_accounts().await?;
            if json {
                print_json(&accounts)?;
            } else {
                print_account_table(&accounts);
            }
        }

        AccountCommands::Show { id } => {
            let account = service.accounts().get_account(id).await?;
            if json {
                print_json(&account)?;
            } else {
                println!("Account: {}", account.id);
                println!("  Owner:    {}", account.owner_id);
                println!(
                    "  Balance:  {} {}",
                    format_cents(account.balance),
                    account.currency
                );
                println!("  Status:   {}", account.status);
                println!(
                    "  Opened:   {}",
                    account.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        AccountCommands::Owner { customer } => {
            let accounts = service.accounts().accounts_for_owner(customer).await?;
            if json {
                print_json(&accounts)?;
            } else {
                print_account_table(&accounts);
            }
        }

        AccountCommands::Delete { id } => {
            let outcome = service.accounts().soft_delete(id).await?;
            if json {
                print_json(outcome.account())?;
            } else {
                match outcome {
                    StatusChange::AlreadyInactive(_) => {
                        println!("Account {} is already inactive", id)
                    }
                    _ => println!("Deactivated account {}", id),
                }
            }
        }
    }
    Ok(())
}

fn parse_amount(amount: &str) -> Result<i64> {
    parse_cents(amount).context("Invalid amount format. Use '50.00' or '50'")
}

fn parse_customer_status(status: &str) -> Result<CustomerStatus> {
    CustomerStatus::from_str(status)
        .ok_or_else(|| anyhow::anyhow!("Invalid status '{}'. Valid: active, inactive", status))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_transaction_result(tx: &Transaction, json: bool) -> Result<()> {
    if json {
        return print_json(tx);
    }
    match tx.destination_account_id {
        Some(destination) => println!(
            "Transferred {} {}: {} -> {} ({})",
            format_cents(tx.amount),
            tx.currency,
            tx.source_account_id,
            destination,
            tx.id
        ),
        None => println!(
            "Recorded {} of {} {} on {} ({})",
            tx.kind,
            format_cents(tx.amount),
            tx.currency,
            tx.source_account_id,
            tx.id
        ),
    }
    Ok(())
}

fn print_account_table(accounts: &[Account]) {
    if accounts.is_empty() {
        println!("No accounts found.");
        return;
    }
    println!(
        "{:<36}  {:<36}  {:>14} {:<4} {:<8}",
        "ID", "OWNER", "BALANCE", "CUR", "STATUS"
    );
    println!("{}", "-".repeat(104));
    for account in accounts {
        println!(
            "{:<36}  {:<36}  {:>14} {:<4} {:<8}",
            account.id,
            account.owner_id,
            format_cents(account.balance),
            account.currency,
            account.status
        );
    }
}

fn print_transaction_table(transactions: &[Transaction]) {
    if transactions.is_empty() {
        println!("No transactions found.");
        return;
    }
    println!(
        "{:<19}  {:<10} {:>12} {:<4} {:<9}  {:<8}",
        "DATE", "KIND", "AMOUNT", "CUR", "STATUS", "ID"
    );
    println!("{}", "-".repeat(72));
    for tx in transactions {
        println!(
            "{:<19}  {:<10} {:>12} {:<4} {:<9}  {:<8}",
            tx.created_at.format("%Y-%m-%d %H:%M:%S"),
            tx.kind,
            format_cents(tx.amount),
            tx.currency,
            tx.status,
            &tx.id.to_string()[..8],
        );
    }
}

fn print_transaction_details(tx: &Transaction) {
    println!("Transaction: {}", tx.id);
    println!("  Kind:        {}", tx.kind);
    println!("  Status:      {}", tx.status);
    println!("  Amount:      {} {}", format_cents(tx.amount), tx.currency);
    println!("  Account:     {}", tx.source_account_id);
    if let Some(destination) = tx.destination_account_id {
        println!("  Destination: {}", destination);
    }
    println!("  Created:     {}", tx.created_at.format("%Y-%m-%d %H:%M:%S"));
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
