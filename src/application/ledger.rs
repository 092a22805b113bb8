use std::sync::Arc;

use tracing::debug;

use crate::domain::{Account, AccountId, Cents};
use crate::storage::{AccountStore, LedgerBatch, LedgerStore};

use super::{AccountGuard, AccountLocks, LedgerError};

/// Decide whether `delta` may be applied to `account`, returning the new
/// balance if so.
pub fn check_effect(account: &Account, delta: Cents) -> Result<Cents, LedgerError> {
    if !account.is_active() {
        return Err(LedgerError::AccountInactive(account.id));
    }

    let new_balance = account
        .balance
        .checked_add(delta)
        .ok_or_else(|| LedgerError::InvalidAmount("balance out of range".to_string()))?;

    if new_balance < 0 {
        return Err(LedgerError::InsufficientFunds {
            account_id: account.id,
            balance: account.balance,
            required: delta.saturating_neg(),
        });
    }

    Ok(new_balance)
}

/// The single path through which account balances change.
pub struct Ledger<S> {
    store: Arc<S>,
    locks: AccountLocks,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: self.locks.clone(),
        }
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: Arc<S>, locks: AccountLocks) -> Self {
        Self { store, locks }
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    /// Apply a signed balance change to one account and return the new balance.
    ///
    /// Concurrent calls on the same account run one after the other, each one
    /// seeing the balance the previous one stored.
    pub async fn apply_effect(
        &self,
        account_id: AccountId,
        delta: Cents,
    ) -> Result<Cents, LedgerError> {
        let guard = self.locks.lock(account_id).await;
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        let mut batch = self.store.begin_batch().await?;
        let new_balance = self
            .stage_effect(&mut batch, &guard, &account, delta)
            .await?;
        batch.commit().await?;
        Ok(new_balance)
    }

    /// Stage a balance change in `batch` and return the new balance.
    ///
    /// `account` must have been read while `guard` was held, and each account
    /// may be staged at most once per batch. Nothing is visible to other
    /// readers until the batch commits.
    pub async fn stage_effect(
        &self,
        batch: &mut S::Batch,
        guard: &AccountGuard,
        account: &Account,
        delta: Cents,
    ) -> Result<Cents, LedgerError> {
        debug_assert!(guard.covers(account.id), "account {} is not locked", account.id);

        let new_balance = check_effect(account, delta)?;

        if !batch
            .compare_and_set_balance(account.id, account.balance, new_balance)
            .await?
        {
            return Err(LedgerError::StoreConflict(account.id));
        }

        debug!(
            account_id = %account.id,
            delta,
            balance = new_balance,
            "staged ledger effect"
        );
        Ok(new_balance)
    }
}
