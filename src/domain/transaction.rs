use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents, Currency};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Credits the source account
    Deposit,
    /// Debits the source account
    Withdrawal,
    /// Debits the source account and credits the destination
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            "transfer" => Some(TransactionKind::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single money movement. A transaction is Pending only while it is being
/// executed; it is stored once, Completed or Failed, and never changed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub source_account_id: AccountId,
    /// Only set for transfers
    pub destination_account_id: Option<AccountId>,
    /// Amount in cents (always positive)
    pub amount: Cents,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    fn new(
        kind: TransactionKind,
        source_account_id: AccountId,
        destination_account_id: Option<AccountId>,
        amount: Cents,
        currency: Currency,
    ) -> Self {
        assert!(amount > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            kind,
            source_account_id,
            destination_account_id,
            amount,
            currency,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn deposit(account_id: AccountId, amount: Cents, currency: Currency) -> Self {
        Self::new(TransactionKind::Deposit, account_id, None, amount, currency)
    }

    pub fn withdrawal(account_id: AccountId, amount: Cents, currency: Currency) -> Self {
        Self::new(TransactionKind::Withdrawal, account_id, None, amount, currency)
    }

    pub fn transfer(
        source_account_id: AccountId,
        destination_account_id: AccountId,
        amount: Cents,
        currency: Currency,
    ) -> Self {
        Self::new(
            TransactionKind::Transfer,
            source_account_id,
            Some(destination_account_id),
            amount,
            currency,
        )
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn touches(&self, account_id: AccountId) -> bool {
        self.source_account_id == account_id || self.destination_account_id == Some(account_id)
    }

    /// The signed balance effects this transaction has when it completes.
    pub fn effects(&self) -> Vec<(AccountId, Cents)> {
        match (self.kind, self.destination_account_id) {
            (TransactionKind::Deposit, _) => vec![(self.source_account_id, self.amount)],
            (TransactionKind::Withdrawal, _) => vec![(self.source_account_id, -self.amount)],
            (TransactionKind::Transfer, Some(destination)) => vec![
                (self.source_account_id, -self.amount),
                (destination, self.amount),
            ],
            (TransactionKind::Transfer, None) => vec![(self.source_account_id, -self.amount)],
        }
    }

    /// The effect this transaction has on one account, zero if it does not touch it.
    pub fn effect_on(&self, account_id: AccountId) -> Cents {
        self.effects()
            .into_iter()
            .filter(|(id, _)| *id == account_id)
            .map(|(_, delta)| delta)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    #[test]
    fn test_new_transaction_is_pending() {
        let tx = Transaction::deposit(Uuid::new_v4(), 5000, usd());
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(!tx.status.is_terminal());
    }

    #[test]
    fn test_transfer_effects() {
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let tx = Transaction::transfer(from, to, 300, usd());

        assert_eq!(tx.effects(), vec![(from, -300), (to, 300)]);
        assert_eq!(tx.effect_on(from), -300);
        assert_eq!(tx.effect_on(to), 300);
        assert_eq!(tx.effect_on(Uuid::new_v4()), 0);
        assert!(tx.touches(to));
    }

    #[test]
    fn test_one_sided_effects() {
        let account = Uuid::new_v4();
        assert_eq!(Transaction::deposit(account, 10, usd()).effect_on(account), 10);
        assert_eq!(
            Transaction::withdrawal(account, 10, usd()).effect_on(account),
            -10
        );
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
        ] {
            assert_eq!(TransactionStatus::from_str(status.as_str()), Some(status));
        }
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdrawal,
            TransactionKind::Transfer,
        ] {
            assert_eq!(TransactionKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    #[should_panic(expected = "Transaction amount must be positive")]
    fn test_transaction_requires_positive_amount() {
        Transaction::withdrawal(Uuid::new_v4(), 0, usd());
    }
}
