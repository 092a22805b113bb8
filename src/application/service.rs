use std::sync::Arc;

use crate::domain::{IntegrityReport, build_integrity_report};
use crate::storage::{LedgerStore, Repository, Store};

use super::{
    AccountLocks, AccountManager, BankConfig, CustomerDirectory, Ledger, LedgerError,
    TransactionOrchestrator,
};

/// Application service wiring customers, accounts and transactions to one
/// store and one account lock table.
/// This is the primary interface for any client (CLI, HTTP adapter, tests).
pub struct BankService<S = Repository> {
    store: Arc<S>,
    ledger: Ledger<S>,
    customers: CustomerDirectory<S>,
    accounts: AccountManager<S>,
    transactions: TransactionOrchestrator<S>,
}

impl BankService<Repository> {
    /// Create (if needed) and migrate the database at the given path.
    pub async fn init(database_path: &str, config: BankConfig) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::with_store(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: BankConfig) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::with_store(repo, config))
    }
}

impl<S: Store> BankService<S> {
    pub fn with_store(store: S, config: BankConfig) -> Self {
        let store = Arc::new(store);
        let locks = AccountLocks::new();
        let ledger = Ledger::new(Arc::clone(&store), locks.clone());

        Self {
            customers: CustomerDirectory::new(Arc::clone(&store)),
            accounts: AccountManager::new(Arc::clone(&store), locks),
            transactions: TransactionOrchestrator::new(
                Arc::clone(&store),
                ledger.clone(),
                config.recovery,
            ),
            ledger,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn customers(&self) -> &CustomerDirectory<S> {
        &self.customers
    }

    pub fn accounts(&self) -> &AccountManager<S> {
        &self.accounts
    }

    pub fn transactions(&self) -> &TransactionOrchestrator<S> {
        &self.transactions
    }

    /// Compare every stored balance with the sum of its completed transactions.
    /// Safe to run while transactions are in flight.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let (accounts, transactions) = self.store.ledger_snapshot().await?;
        Ok(build_integrity_report(&accounts, &transactions))
    }
}
