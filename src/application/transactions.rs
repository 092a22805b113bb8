use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::{
    Account, AccountId, Cents, Transaction, TransactionId, TransactionKind, TransactionStatus,
};
use crate::storage::{AccountStore, LedgerBatch, LedgerStore, TransactionStore};

use super::{Ledger, LedgerError, RecoveryPolicy, check_effect};

fn validate_amount(amount: Cents) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Business rules a transfer must pass before any balance is touched.
fn check_transfer(
    source: &Account,
    destination: &Account,
    amount: Cents,
) -> Result<(), LedgerError> {
    if source.currency != destination.currency {
        return Err(LedgerError::CurrencyMismatch {
            source_currency: source.currency.clone(),
            destination_currency: destination.currency.clone(),
        });
    }
    if !source.is_active() {
        return Err(LedgerError::AccountInactive(source.id));
    }
    if !destination.is_active() {
        return Err(LedgerError::AccountInactive(destination.id));
    }
    check_effect(source, -amount)?;
    check_effect(destination, amount)?;
    Ok(())
}

/// Turns deposit, withdrawal and transfer requests into ledger effects and
/// keeps the transaction log in step with them.
///
/// The effects of a request and its Completed record are staged in one
/// [`LedgerBatch`] and become visible together on commit. When a transfer's
/// credit fails after its debit was staged, rolling the batch back reverses
/// the debit, and a Failed record of the attempt is kept.
pub struct TransactionOrchestrator<S> {
    store: Arc<S>,
    ledger: Ledger<S>,
    policy: RecoveryPolicy,
}

impl<S: LedgerStore> TransactionOrchestrator<S> {
    pub fn new(store: Arc<S>, ledger: Ledger<S>, policy: RecoveryPolicy) -> Self {
        Self {
            store,
            ledger,
            policy,
        }
    }

    pub fn policy(&self) -> RecoveryPolicy {
        self.policy
    }

    /// Move `amount` out of `source_id`, into `destination_id` when given.
    /// Without a destination this is a withdrawal.
    pub async fn create_transaction(
        &self,
        source_id: AccountId,
        destination_id: Option<AccountId>,
        amount: Cents,
    ) -> Result<Transaction, LedgerError> {
        match destination_id {
            Some(destination_id) => self.transfer(source_id, destination_id, amount).await,
            None => self.withdraw(source_id, amount).await,
        }
    }

    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Transaction, LedgerError> {
        self.apply_one_sided(TransactionKind::Deposit, account_id, amount)
            .await
    }

    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Transaction, LedgerError> {
        self.apply_one_sided(TransactionKind::Withdrawal, account_id, amount)
            .await
    }

    pub async fn transfer(
        &self,
        source_id: AccountId,
        destination_id: AccountId,
        amount: Cents,
    ) -> Result<Transaction, LedgerError> {
        validate_amount(amount)?;
        if source_id == destination_id {
            return Err(LedgerError::SameAccount(source_id));
        }

        // Fail fast on unknown ids before queueing for any lock.
        self.require_account(source_id).await?;
        self.require_account(destination_id).await?;

        let guard = self
            .ledger
            .locks()
            .lock_all(&[source_id, destination_id])
            .await;
        let source = self.require_account(source_id).await?;
        let destination = self.require_account(destination_id).await?;

        let transaction =
            Transaction::transfer(source_id, destination_id, amount, source.currency.clone());

        if let Err(err) = check_transfer(&source, &destination, amount) {
            self.record_failed(transaction, &err).await;
            return Err(err);
        }

        let mut batch = self.store.begin_batch().await?;

        if let Err(err) = self
            .ledger
            .stage_effect(&mut batch, &guard, &source, -amount)
            .await
        {
            return Err(self.abandon(batch, transaction, err).await);
        }

        if let Err(err) = self
            .ledger
            .stage_effect(&mut batch, &guard, &destination, amount)
            .await
        {
            warn!(
                transaction_id = %transaction.id,
                error = %err,
                "credit failed, reversing debit"
            );
            return Err(self.abandon(batch, transaction, err).await);
        }

        let transaction = self.commit(batch, transaction).await?;
        info!(
            transaction_id = %transaction.id,
            source = %source_id,
            destination = %destination_id,
            amount,
            "transfer completed"
        );
        Ok(transaction)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.store.list_transactions().await?)
    }

    /// History of one account, oldest first. Unknown accounts are an error; a
    /// known account without history yields an empty list.
    pub async fn transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.require_account(account_id).await?;
        Ok(self.store.list_transactions_for_account(account_id).await?)
    }

    async fn apply_one_sided(
        &self,
        kind: TransactionKind,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Transaction, LedgerError> {
        validate_amount(amount)?;

        let guard = self.ledger.locks().lock(account_id).await;
        let account = self.require_account(account_id).await?;
        let currency = account.currency.clone();

        let (transaction, delta) = match kind {
            TransactionKind::Deposit => {
                (Transaction::deposit(account_id, amount, currency), amount)
            }
            TransactionKind::Withdrawal | TransactionKind::Transfer => (
                Transaction::withdrawal(account_id, amount, currency),
                -amount,
            ),
        };

        if let Err(err) = check_effect(&account, delta) {
            self.record_failed(transaction, &err).await;
            return Err(err);
        }

        let mut batch = self.store.begin_batch().await?;
        let balance = match self
            .ledger
            .stage_effect(&mut batch, &guard, &account, delta)
            .await
        {
            Ok(balance) => balance,
            Err(err) => return Err(self.abandon(batch, transaction, err).await),
        };

        let transaction = self.commit(batch, transaction).await?;
        info!(
            transaction_id = %transaction.id,
            kind = %kind,
            account_id = %account_id,
            amount,
            balance,
            "transaction completed"
        );
        Ok(transaction)
    }

    /// Append the Completed record to `batch` and commit it.
    async fn commit(
        &self,
        mut batch: S::Batch,
        transaction: Transaction,
    ) -> Result<Transaction, LedgerError> {
        let transaction = transaction.with_status(TransactionStatus::Completed);

        if let Err(err) = batch.append_transaction(&transaction).await {
            return Err(self.abandon(batch, transaction, err.into()).await);
        }

        match batch.commit().await {
            Ok(()) => Ok(transaction),
            Err(err) => self.confirm_commit(transaction, err.into()).await,
        }
    }

    /// A failed commit may still have been applied. Look the record up to
    /// find out, a bounded number of times.
    async fn confirm_commit(
        &self,
        transaction: Transaction,
        commit_err: LedgerError,
    ) -> Result<Transaction, LedgerError> {
        warn!(
            transaction_id = %transaction.id,
            error = %commit_err,
            "commit not acknowledged, looking up outcome"
        );

        let mut attempt = 1;
        loop {
            match self.store.get_transaction(transaction.id).await {
                Ok(Some(stored)) => {
                    info!(transaction_id = %stored.id, "commit confirmed");
                    return Ok(stored);
                }
                Ok(None) => {
                    self.record_failed(transaction, &commit_err).await;
                    return Err(commit_err);
                }
                Err(err) if attempt < self.policy.max_attempts => {
                    warn!(
                        transaction_id = %transaction.id,
                        attempt,
                        error = %err,
                        "outcome lookup failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(err) => {
                    error!(
                        transaction_id = %transaction.id,
                        account_id = %transaction.source_account_id,
                        amount = transaction.amount,
                        attempts = attempt,
                        error = %err,
                        "transaction outcome unknown, manual reconciliation required"
                    );
                    return Err(LedgerError::ReconciliationRequired {
                        transaction_id: transaction.id,
                        account_id: transaction.source_account_id,
                        amount: transaction.amount,
                    });
                }
            }
        }
    }

    /// Discard everything staged in `batch` and keep a Failed record of the
    /// attempt. Returns the error the caller should see.
    async fn abandon(
        &self,
        batch: S::Batch,
        transaction: Transaction,
        reason: LedgerError,
    ) -> LedgerError {
        if let Err(err) = batch.rollback().await {
            // The database discards an uncommitted batch either way.
            warn!(
                transaction_id = %transaction.id,
                error = %err,
                "rollback failed"
            );
        }
        self.record_failed(transaction, &reason).await;
        reason
    }

    /// Keep an audit record of a request that did not go through.
    async fn record_failed(&self, transaction: Transaction, reason: &LedgerError) {
        let transaction = transaction.with_status(TransactionStatus::Failed);
        if let Err(err) = self.store.append_transaction(&transaction).await {
            warn!(
                transaction_id = %transaction.id,
                error = %err,
                "could not record failed transaction"
            );
        }
        info!(
            transaction_id = %transaction.id,
            kind = %transaction.kind,
            reason = reason.kind(),
            "transaction failed"
        );
    }

    async fn require_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }
}
