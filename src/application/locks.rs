use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::AccountId;

type LockTable = HashMap<AccountId, Arc<AsyncMutex<()>>>;

/// Per-account mutual exclusion.
///
/// Each account id maps to its own async mutex, created on first use and
/// dropped again once nobody holds or waits for it. Locks on several accounts
/// are always taken in ascending id order, so two callers can never wait on
/// each other in a cycle.
#[derive(Clone, Default)]
pub struct AccountLocks {
    table: Arc<Mutex<LockTable>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a single account.
    pub async fn lock(&self, account_id: AccountId) -> AccountGuard {
        self.lock_all(&[account_id]).await
    }

    /// Lock every listed account. Duplicates are ignored and the order of
    /// `account_ids` does not matter.
    pub async fn lock_all(&self, account_ids: &[AccountId]) -> AccountGuard {
        let mut ids = account_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        // Filled in as locks are taken, so a caller cancelled halfway still
        // releases and prunes what it already holds.
        let mut guard = AccountGuard {
            ids: Vec::with_capacity(ids.len()),
            guards: Vec::with_capacity(ids.len()),
            locks: self.clone(),
        };
        for id in ids {
            let mutex = self.mutex_for(id);
            guard.ids.push(id);
            guard.guards.push(mutex.lock_owned().await);
        }
        guard
    }

    /// Number of accounts that currently have a lock entry.
    pub fn tracked(&self) -> usize {
        self.table().len()
    }

    fn mutex_for(&self, account_id: AccountId) -> Arc<AsyncMutex<()>> {
        self.table().entry(account_id).or_default().clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, LockTable> {
        // The table is only touched in short non-panicking sections.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof that the holder has exclusive access to a set of accounts.
/// Dropping it releases every lock.
pub struct AccountGuard {
    ids: Vec<AccountId>,
    guards: Vec<OwnedMutexGuard<()>>,
    locks: AccountLocks,
}

impl AccountGuard {
    pub fn covers(&self, account_id: AccountId) -> bool {
        self.ids.binary_search(&account_id).is_ok()
    }

    pub fn accounts(&self) -> &[AccountId] {
        &self.ids
    }
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        self.guards.clear();

        // An entry referenced only by the table has no holder and no waiter.
        let mut table = self.locks.table();
        for id in &self.ids {
            if table
                .get(id)
                .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
            {
                table.remove(id);
            }
        }
    }
}
