use std::future::Future;

use anyhow::Result;

use crate::domain::{
    Account, AccountId, AccountStatus, Cents, Customer, CustomerId, Transaction, TransactionId,
};

/// Durable storage of account rows. Balances are only written through a
/// [`LedgerBatch`].
pub trait AccountStore: Send + Sync {
    /// Persist a new account, together with its opening deposit when there is
    /// one, as a single atomic write.
    fn open_account(
        &self,
        account: &Account,
        opening_deposit: Option<&Transaction>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_account(&self, id: AccountId) -> impl Future<Output = Result<Option<Account>>> + Send;

    fn list_accounts(&self) -> impl Future<Output = Result<Vec<Account>>> + Send;

    fn list_accounts_by_owner(
        &self,
        owner_id: CustomerId,
    ) -> impl Future<Output = Result<Vec<Account>>> + Send;

    fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub trait CustomerStore: Send + Sync {
    fn save_customer(&self, customer: &Customer) -> impl Future<Output = Result<()>> + Send;

    fn get_customer(
        &self,
        id: CustomerId,
    ) -> impl Future<Output = Result<Option<Customer>>> + Send;

    fn list_customers(&self) -> impl Future<Output = Result<Vec<Customer>>> + Send;

    /// Returns false when no customer with that id exists.
    fn update_customer(&self, customer: &Customer) -> impl Future<Output = Result<bool>> + Send;
}

/// Append-only storage of transactions. Records are written once, already in
/// their final status, and never updated.
pub trait TransactionStore: Send + Sync {
    fn append_transaction(
        &self,
        transaction: &Transaction,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_transaction(
        &self,
        id: TransactionId,
    ) -> impl Future<Output = Result<Option<Transaction>>> + Send;

    fn list_transactions(&self) -> impl Future<Output = Result<Vec<Transaction>>> + Send;

    fn list_transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> impl Future<Output = Result<Vec<Transaction>>> + Send;
}

/// Balance writes and transaction records staged in one database transaction.
///
/// Other readers see none of the staged writes until [`LedgerBatch::commit`]
/// succeeds. Dropping a batch without committing discards it, so a caller that
/// is cancelled halfway leaves nothing behind.
pub trait LedgerBatch: Send {
    /// Stage `new` as the balance of an active account if it still holds
    /// `expected`. Returns false when nothing was written.
    fn compare_and_set_balance(
        &mut self,
        id: AccountId,
        expected: Cents,
        new: Cents,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn append_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> impl Future<Output = Result<()>> + Send;

    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}

/// Atomic access to balances and the transaction log together.
pub trait LedgerStore: AccountStore + TransactionStore {
    type Batch: LedgerBatch;

    fn begin_batch(&self) -> impl Future<Output = Result<Self::Batch>> + Send;

    /// All accounts and all transactions, read from one consistent snapshot.
    fn ledger_snapshot(
        &self,
    ) -> impl Future<Output = Result<(Vec<Account>, Vec<Transaction>)>> + Send;
}

/// Everything the bank service needs from persistence.
pub trait Store: LedgerStore + CustomerStore {}

impl<T: LedgerStore + CustomerStore> Store for T {}
