// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use bankcore::application::{BankConfig, BankService, CustomerDetails, RecoveryPolicy};
use bankcore::domain::{
    Account, AccountId, AccountStatus, Cents, Currency, Customer, CustomerId, Transaction,
    TransactionId,
};
use bankcore::storage::{
    AccountStore, CustomerStore, LedgerBatch, LedgerStore, RepositoryBatch, Store,
    TransactionStore,
};
use bankcore::Repository;
use tempfile::TempDir;

/// Recovery policy with a short pause so failure tests stay fast.
pub fn fast_config() -> BankConfig {
    BankConfig::default().with_recovery(RecoveryPolicy::new(3, Duration::from_millis(1)))
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(BankService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = BankService::init(db_path.to_str().unwrap(), fast_config()).await?;
    Ok((service, temp_dir))
}

/// Helper to create a service whose store can be told to fail on demand.
pub async fn flaky_service() -> Result<(BankService<FlakyStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let url = format!("sqlite:{}?mode=rwc", db_path.to_str().unwrap());
    let repo = Repository::init(&url).await?;
    let service = BankService::with_store(FlakyStore::new(repo), fast_config());
    Ok((service, temp_dir))
}

pub fn usd() -> Currency {
    Currency::new("USD").unwrap()
}

pub fn eur() -> Currency {
    Currency::new("EUR").unwrap()
}

/// Test fixture: one customer holding accounts in the currencies asked for.
pub struct StandardAccounts;

impl StandardAccounts {
    pub async fn customer<S>(service: &BankService<S>, name: &str) -> Result<Customer>
    where
        S: Store,
    {
        Ok(service
            .customers()
            .create_customer(CustomerDetails::new(name))
            .await?)
    }

    pub async fn open<S>(
        service: &BankService<S>,
        owner: CustomerId,
        currency: Currency,
        balance: Cents,
    ) -> Result<Account>
    where
        S: Store,
    {
        Ok(service
            .accounts()
            .create_account(owner, currency, balance, AccountStatus::Active)
            .await?)
    }

    /// X holding 10.00 USD and Y holding 5.00 USD, owned by the same customer.
    pub async fn pair<S>(service: &BankService<S>) -> Result<(Account, Account)>
    where
        S: Store,
    {
        let owner = Self::customer(service, "Ada Lovelace").await?;
        let x = Self::open(service, owner.id, usd(), 1000).await?;
        let y = Self::open(service, owner.id, usd(), 500).await?;
        Ok((x, y))
    }
}

pub async fn balance_of<S>(service: &BankService<S>, id: AccountId) -> Result<Cents>
where
    S: Store,
{
    Ok(service.accounts().get_account(id).await?.balance)
}

/// How many more times a fault fires. `Always` never runs out.
#[derive(Debug, Clone, Copy)]
enum Remaining {
    Times(u32),
    Always,
}

impl Remaining {
    fn fire(&mut self) -> bool {
        match self {
            Remaining::Always => true,
            Remaining::Times(n) if *n > 0 => {
                *n -= 1;
                true
            }
            Remaining::Times(_) => false,
        }
    }
}

/// What happens to the next batch commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFault {
    /// The batch is rolled back and the caller gets an error.
    Lost,
    /// The batch is committed but the caller still gets an error.
    Unacknowledged,
}

#[derive(Default)]
struct Faults {
    credits: HashMap<AccountId, Remaining>,
    stalled_credits: Vec<AccountId>,
    commit: Option<CommitFault>,
    lookups: Option<Remaining>,
}

impl Faults {
    fn credit_fails(&mut self, account_id: AccountId) -> bool {
        self.credits
            .get_mut(&account_id)
            .is_some_and(|remaining| remaining.fire())
    }

    fn lookup_fails(&mut self) -> bool {
        self.lookups.as_mut().is_some_and(|remaining| remaining.fire())
    }
}

/// Store wrapper that delegates to a [`Repository`] but can be told to fail
/// balance credits (writes where the new balance is above the expected one),
/// batch commits or transaction lookups.
pub struct FlakyStore {
    inner: Repository,
    faults: Arc<Mutex<Faults>>,
}

impl FlakyStore {
    pub fn new(inner: Repository) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    /// Fail the next `times` credits to `account_id`.
    pub fn fail_credits(&self, account_id: AccountId, times: u32) {
        self.faults
            .lock()
            .unwrap()
            .credits
            .insert(account_id, Remaining::Times(times));
    }

    /// Fail every credit to `account_id` from now on.
    pub fn fail_all_credits(&self, account_id: AccountId) {
        self.faults
            .lock()
            .unwrap()
            .credits
            .insert(account_id, Remaining::Always);
    }

    /// Make credits to `account_id` hang until the caller gives up.
    pub fn stall_credits(&self, account_id: AccountId) {
        self.faults.lock().unwrap().stalled_credits.push(account_id);
    }

    pub fn fail_next_commit(&self, fault: CommitFault) {
        self.faults.lock().unwrap().commit = Some(fault);
    }

    /// Fail the next `times` transaction lookups by id.
    pub fn fail_lookups(&self, times: u32) {
        self.faults.lock().unwrap().lookups = Some(Remaining::Times(times));
    }

    pub fn fail_all_lookups(&self) {
        self.faults.lock().unwrap().lookups = Some(Remaining::Always);
    }

    pub fn heal(&self) {
        *self.faults.lock().unwrap() = Faults::default();
    }

    pub fn inner(&self) -> &Repository {
        &self.inner
    }
}

/// Batch wrapper sharing its store's fault settings.
pub struct FlakyBatch {
    inner: RepositoryBatch,
    faults: Arc<Mutex<Faults>>,
}

impl FlakyBatch {
    fn credit_stalls(&self, account_id: AccountId) -> bool {
        self.faults
            .lock()
            .unwrap()
            .stalled_credits
            .contains(&account_id)
    }
}

impl LedgerBatch for FlakyBatch {
    async fn compare_and_set_balance(
        &mut self,
        id: AccountId,
        expected: Cents,
        new: Cents,
    ) -> Result<bool> {
        if new > expected {
            if self.credit_stalls(id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.faults.lock().unwrap().credit_fails(id) {
                return Err(anyhow!("injected failure crediting account {}", id));
            }
        }
        self.inner.compare_and_set_balance(id, expected, new).await
    }

    async fn append_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.inner.append_transaction(transaction).await
    }

    async fn commit(self) -> Result<()> {
        let fault = self.faults.lock().unwrap().commit.take();
        match fault {
            None => self.inner.commit().await,
            Some(CommitFault::Lost) => {
                self.inner.rollback().await?;
                Err(anyhow!("injected commit failure"))
            }
            Some(CommitFault::Unacknowledged) => {
                self.inner.commit().await?;
                Err(anyhow!("injected lost commit acknowledgement"))
            }
        }
    }

    async fn rollback(self) -> Result<()> {
        self.inner.rollback().await
    }
}

impl AccountStore for FlakyStore {
    async fn open_account(
        &self,
        account: &Account,
        opening_deposit: Option<&Transaction>,
    ) -> Result<()> {
        self.inner.open_account(account, opening_deposit).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.inner.get_account(id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn list_accounts_by_owner(&self, owner_id: CustomerId) -> Result<Vec<Account>> {
        self.inner.list_accounts_by_owner(owner_id).await
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        self.inner.set_account_status(id, status).await
    }
}

impl CustomerStore for FlakyStore {
    async fn save_customer(&self, customer: &Customer) -> Result<()> {
        self.inner.save_customer(customer).await
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        self.inner.get_customer(id).await
    }

    async fn list_customers(&self) -> Result<Vec<Customer>> {
        self.inner.list_customers().await
    }

    async fn update_customer(&self, customer: &Customer) -> Result<bool> {
        self.inner.update_customer(customer).await
    }
}

impl TransactionStore for FlakyStore {
    async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.inner.append_transaction(transaction).await
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        if self.faults.lock().unwrap().lookup_fails() {
            return Err(anyhow!("injected failure reading transaction {}", id));
        }
        self.inner.get_transaction(id).await
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        self.inner.list_transactions().await
    }

    async fn list_transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>> {
        self.inner.list_transactions_for_account(account_id).await
    }
}

impl LedgerStore for FlakyStore {
    type Batch = FlakyBatch;

    async fn begin_batch(&self) -> Result<FlakyBatch> {
        Ok(FlakyBatch {
            inner: self.inner.begin_batch().await?,
            faults: Arc::clone(&self.faults),
        })
    }

    async fn ledger_snapshot(&self) -> Result<(Vec<Account>, Vec<Transaction>)> {
        self.inner.ledger_snapshot().await
    }
}
