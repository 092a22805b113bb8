use thiserror::Error;

use crate::domain::{AccountId, Cents, Currency, CustomerId, TransactionId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Customer does not exist: {0}")]
    InvalidOwner(CustomerId),

    #[error("Customer not found: {0}")]
    CustomerNotFound(CustomerId),

    #[error("Invalid customer: {0}")]
    InvalidCustomer(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account is inactive: {0}")]
    AccountInactive(AccountId),

    #[error("Inactive account cannot be reactivated: {0}")]
    ReactivationNotAllowed(AccountId),

    #[error("Insufficient funds in account {account_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Cents,
        required: Cents,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Currency mismatch between accounts: {source_currency} vs {destination_currency}")]
    CurrencyMismatch {
        source_currency: Currency,
        destination_currency: Currency,
    },

    #[error("Source and destination are the same account: {0}")]
    SameAccount(AccountId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Account {0} was modified outside the ledger")]
    StoreConflict(AccountId),

    #[error(
        "Outcome of transaction {transaction_id} moving {amount} cents from account \
         {account_id} is unknown; manual reconciliation required"
    )]
    ReconciliationRequired {
        transaction_id: TransactionId,
        account_id: AccountId,
        amount: Cents,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] anyhow::Error),
}

impl LedgerError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidOwner(_) => "invalid_owner",
            LedgerError::CustomerNotFound(_) => "customer_not_found",
            LedgerError::InvalidCustomer(_) => "invalid_customer",
            LedgerError::AccountNotFound(_) => "account_not_found",
            LedgerError::AccountInactive(_) => "account_inactive",
            LedgerError::ReactivationNotAllowed(_) => "reactivation_not_allowed",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::CurrencyMismatch { .. } => "currency_mismatch",
            LedgerError::SameAccount(_) => "same_account",
            LedgerError::TransactionNotFound(_) => "transaction_not_found",
            LedgerError::StoreConflict(_) => "store_conflict",
            LedgerError::ReconciliationRequired { .. } => "reconciliation_required",
            LedgerError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Business-rule violations, as opposed to infrastructure faults.
    pub fn is_business_rule(&self) -> bool {
        !matches!(
            self,
            LedgerError::StoreUnavailable(_)
                | LedgerError::StoreConflict(_)
                | LedgerError::ReconciliationRequired { .. }
        )
    }

    /// Process exit code used by the command-line front end.
    pub fn exit_code(&self) -> u8 {
        match self {
            LedgerError::InvalidOwner(_)
            | LedgerError::InvalidCustomer(_)
            | LedgerError::InvalidAmount(_)
            | LedgerError::SameAccount(_) => 2,
            LedgerError::CustomerNotFound(_)
            | LedgerError::AccountNotFound(_)
            | LedgerError::TransactionNotFound(_) => 3,
            LedgerError::AccountInactive(_)
            | LedgerError::ReactivationNotAllowed(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::CurrencyMismatch { .. } => 4,
            LedgerError::StoreConflict(_) | LedgerError::StoreUnavailable(_) => 5,
            LedgerError::ReconciliationRequired { .. } => 6,
        }
    }
}
