use std::collections::HashMap;

use serde::Serialize;

use super::{Account, AccountId, Cents, Transaction, TransactionId, TransactionStatus};

/// Compute the balance of one account from its transaction history.
/// Only Completed transactions count; Pending and Failed ones never moved money.
pub fn compute_balance(account_id: AccountId, transactions: &[Transaction]) -> Cents {
    transactions
        .iter()
        .filter(|tx| tx.status == TransactionStatus::Completed)
        .fold(0, |balance, tx| balance + tx.effect_on(account_id))
}

/// Compute balances for every account touched by a Completed transaction.
pub fn compute_all_balances(transactions: &[Transaction]) -> HashMap<AccountId, Cents> {
    let mut balances: HashMap<AccountId, Cents> = HashMap::new();

    for tx in transactions
        .iter()
        .filter(|tx| tx.status == TransactionStatus::Completed)
    {
        for (account_id, delta) in tx.effects() {
            *balances.entry(account_id).or_insert(0) += delta;
        }
    }

    balances
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IntegrityIssue {
    BalanceMismatch {
        account_id: AccountId,
        stored: Cents,
        computed: Cents,
    },
    NegativeBalance {
        account_id: AccountId,
        balance: Cents,
    },
    StalePending {
        transaction_id: TransactionId,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::BalanceMismatch {
                account_id,
                stored,
                computed,
            } => write!(
                f,
                "account {} stores {} but its completed transactions sum to {}",
                account_id, stored, computed
            ),
            IntegrityIssue::NegativeBalance {
                account_id,
                balance,
            } => write!(f, "account {} has negative balance {}", account_id, balance),
            IntegrityIssue::StalePending { transaction_id } => {
                write!(f, "transaction {} was stored as pending", transaction_id)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub transaction_count: usize,
    pub total_balance: Cents,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Cross-check stored balances against the transaction history. Both slices
/// must come from the same snapshot of the store.
pub fn build_integrity_report(
    accounts: &[Account],
    transactions: &[Transaction],
) -> IntegrityReport {
    let computed = compute_all_balances(transactions);
    let mut issues = Vec::new();

    for account in accounts {
        let expected = computed.get(&account.id).copied().unwrap_or(0);
        if account.balance != expected {
            issues.push(IntegrityIssue::BalanceMismatch {
                account_id: account.id,
                stored: account.balance,
                computed: expected,
            });
        }
        if account.balance < 0 {
            issues.push(IntegrityIssue::NegativeBalance {
                account_id: account.id,
                balance: account.balance,
            });
        }
    }

    for tx in transactions {
        if tx.status == TransactionStatus::Pending {
            issues.push(IntegrityIssue::StalePending {
                transaction_id: tx.id,
            });
        }
    }

    IntegrityReport {
        account_count: accounts.len(),
        transaction_count: transactions.len(),
        total_balance: accounts.iter().map(|a| a.balance).sum(),
        issues,
    }
}
