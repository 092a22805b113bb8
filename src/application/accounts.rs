use std::sync::Arc;

use tracing::info;

use crate::domain::{
    Account, AccountId, AccountStatus, Cents, Currency, CustomerId, Transaction, TransactionStatus,
};
use crate::storage::{AccountStore, CustomerStore};

use super::{AccountLocks, LedgerError};

/// Outcome of a status change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// The account moved to the requested status.
    Changed(Account),
    /// The account was already active; nothing was written.
    Unchanged(Account),
    /// Repeated soft delete; nothing was written.
    AlreadyInactive(Account),
}

impl StatusChange {
    pub fn account(&self) -> &Account {
        match self {
            StatusChange::Changed(account)
            | StatusChange::Unchanged(account)
            | StatusChange::AlreadyInactive(account) => account,
        }
    }

    pub fn into_account(self) -> Account {
        match self {
            StatusChange::Changed(account)
            | StatusChange::Unchanged(account)
            | StatusChange::AlreadyInactive(account) => account,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, StatusChange::Changed(_))
    }
}

/// Account creation, status transitions and reads.
pub struct AccountManager<S> {
    store: Arc<S>,
    locks: AccountLocks,
}

impl<S: AccountStore + CustomerStore> AccountManager<S> {
    pub fn new(store: Arc<S>, locks: AccountLocks) -> Self {
        Self { store, locks }
    }

    /// Open an account for an existing customer.
    ///
    /// A positive initial balance is booked as a completed deposit in the same
    /// write, so the balance always matches the transaction history.
    pub async fn create_account(
        &self,
        owner_id: CustomerId,
        currency: Currency,
        initial_balance: Cents,
        status: AccountStatus,
    ) -> Result<Account, LedgerError> {
        if initial_balance < 0 {
            return Err(LedgerError::InvalidAmount(
                "Initial balance cannot be negative".to_string(),
            ));
        }

        if self.store.get_customer(owner_id).await?.is_none() {
            return Err(LedgerError::InvalidOwner(owner_id));
        }

        let account = Account::new(owner_id, currency.clone(), initial_balance).with_status(status);
        let opening_deposit = (initial_balance > 0).then(|| {
            Transaction::deposit(account.id, initial_balance, currency)
                .with_status(TransactionStatus::Completed)
        });

        self.store
            .open_account(&account, opening_deposit.as_ref())
            .await?;

        info!(
            account_id = %account.id,
            owner_id = %owner_id,
            currency = %account.currency,
            balance = initial_balance,
            "account opened"
        );
        Ok(account)
    }

    /// Move an account to `new_status`. Only Active -> Inactive is a real
    /// transition; repeating it reports [`StatusChange::AlreadyInactive`].
    pub async fn change_status(
        &self,
        account_id: AccountId,
        new_status: AccountStatus,
    ) -> Result<StatusChange, LedgerError> {
        // Serialise with balance effects on the same account.
        let _guard = self.locks.lock(account_id).await;
        let mut account = self.get_account(account_id).await?;

        match (account.status, new_status) {
            (AccountStatus::Active, AccountStatus::Inactive) => {
                self.store
                    .set_account_status(account_id, AccountStatus::Inactive)
                    .await?;
                account.status = AccountStatus::Inactive;
                info!(account_id = %account_id, "account deactivated");
                Ok(StatusChange::Changed(account))
            }
            (AccountStatus::Inactive, AccountStatus::Inactive) => {
                Ok(StatusChange::AlreadyInactive(account))
            }
            (AccountStatus::Active, AccountStatus::Active) => Ok(StatusChange::Unchanged(account)),
            (AccountStatus::Inactive, AccountStatus::Active) => {
                Err(LedgerError::ReactivationNotAllowed(account_id))
            }
        }
    }

    /// Soft delete: deactivate the account, keeping its row and history.
    pub async fn soft_delete(&self, account_id: AccountId) -> Result<StatusChange, LedgerError> {
        self.change_status(account_id, AccountStatus::Inactive).await
    }

    pub async fn get_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Accounts owned by a customer. Unknown customers are an error, a known
    /// customer without accounts yields an empty list.
    pub async fn accounts_for_owner(
        &self,
        owner_id: CustomerId,
    ) -> Result<Vec<Account>, LedgerError> {
        if self.store.get_customer(owner_id).await?.is_none() {
            return Err(LedgerError::CustomerNotFound(owner_id));
        }
        Ok(self.store.list_accounts_by_owner(owner_id).await?)
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.list_accounts().await?)
    }
}
