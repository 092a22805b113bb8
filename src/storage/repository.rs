use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountStatus, Cents, Currency, Customer, CustomerId, CustomerStatus,
    Transaction, TransactionId, TransactionKind, TransactionStatus,
};

use super::{
    AccountStore, CustomerStore, LedgerBatch, LedgerStore, MIGRATION_001_INITIAL, TransactionStore,
};

/// How long a writer waits for SQLite's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_CONNECTIONS: u32 = 8;

const ACCOUNT_COLUMNS: &str = "id, owner_id, balance, currency, status, created_at";

const CUSTOMER_COLUMNS: &str = "id, name, city, zipcode, status, created_at";

const TRANSACTION_COLUMNS: &str =
    "id, kind, source_account_id, destination_account_id, amount, currency, status, created_at";

/// SQLite-backed store for customers, accounts and transactions.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL. Add `?mode=rwc` to create the file
    /// when it does not exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let owner_str: String = row.get("owner_id");
        let currency_str: String = row.get("currency");
        let status_str: String = row.get("status");
        let created_at_str: String = row.get("created_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            owner_id: Uuid::parse_str(&owner_str).context("Invalid owner ID")?,
            balance: row.get("balance"),
            currency: Currency::new(&currency_str).context("Invalid account currency")?,
            status: AccountStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account status: {}", status_str))?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_customer(row: &SqliteRow) -> Result<Customer> {
        let id_str: String = row.get("id");
        let status_str: String = row.get("status");
        let created_at_str: String = row.get("created_at");

        Ok(Customer {
            id: Uuid::parse_str(&id_str).context("Invalid customer ID")?,
            name: row.get("name"),
            city: row.get("city"),
            zipcode: row.get("zipcode"),
            status: CustomerStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid customer status: {}", status_str))?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let source_str: String = row.get("source_account_id");
        let destination_str: Option<String> = row.get("destination_account_id");
        let currency_str: String = row.get("currency");
        let status_str: String = row.get("status");
        let created_at_str: String = row.get("created_at");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            kind: TransactionKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            source_account_id: Uuid::parse_str(&source_str).context("Invalid source account ID")?,
            destination_account_id: destination_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid destination account ID")?,
            amount: row.get("amount"),
            currency: Currency::new(&currency_str).context("Invalid transaction currency")?,
            status: TransactionStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp: {}", value))?
        .with_timezone(&Utc))
}

impl AccountStore for Repository {
    async fn open_account(
        &self,
        account: &Account,
        opening_deposit: Option<&Transaction>,
    ) -> Result<()> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin account creation")?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, owner_id, balance, currency, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.owner_id.to_string())
        .bind(account.balance)
        .bind(account.currency.as_str())
        .bind(account.status.as_str())
        .bind(account.created_at.to_rfc3339())
        .execute(&mut *db_tx)
        .await
        .context("Failed to save account")?;

        if let Some(deposit) = opening_deposit {
            insert_transaction(&mut *db_tx, deposit)
                .await
                .context("Failed to save opening deposit")?;
        }

        db_tx
            .commit()
            .await
            .context("Failed to commit account creation")?;
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let query = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let query = format!(
            "SELECT {} FROM accounts ORDER BY created_at, rowid",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    async fn list_accounts_by_owner(&self, owner_id: CustomerId) -> Result<Vec<Account>> {
        let query = format!(
            "SELECT {} FROM accounts WHERE owner_id = ? ORDER BY created_at, rowid",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(owner_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts for owner")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        sqlx::query("UPDATE accounts SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update account status")?;
        Ok(())
    }
}

impl CustomerStore for Repository {
    async fn save_customer(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, name, city, zipcode, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(customer.id.to_string())
        .bind(&customer.name)
        .bind(&customer.city)
        .bind(&customer.zipcode)
        .bind(customer.status.as_str())
        .bind(customer.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save customer")?;
        Ok(())
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        let query = format!("SELECT {} FROM customers WHERE id = ?", CUSTOMER_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch customer")?;

        row.as_ref().map(Self::row_to_customer).transpose()
    }

    async fn list_customers(&self) -> Result<Vec<Customer>> {
        let query = format!(
            "SELECT {} FROM customers ORDER BY name, rowid",
            CUSTOMER_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list customers")?;

        rows.iter().map(Self::row_to_customer).collect()
    }

    async fn update_customer(&self, customer: &Customer) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE customers
            SET name = ?, city = ?, zipcode = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(&customer.name)
        .bind(&customer.city)
        .bind(&customer.zipcode)
        .bind(customer.status.as_str())
        .bind(customer.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update customer")?;

        Ok(result.rows_affected() == 1)
    }
}

impl TransactionStore for Repository {
    async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        insert_transaction(&self.pool, transaction)
            .await
            .context("Failed to save transaction")
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE id = ?",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch transaction")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions ORDER BY rowid",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    async fn list_transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions \
             WHERE source_account_id = ? OR destination_account_id = ? \
             ORDER BY rowid",
            TRANSACTION_COLUMNS
        );
        let account_id_str = account_id.to_string();
        let rows = sqlx::query(&query)
            .bind(&account_id_str)
            .bind(&account_id_str)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions for account")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }
}

impl LedgerStore for Repository {
    type Batch = RepositoryBatch;

    async fn begin_batch(&self) -> Result<RepositoryBatch> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin ledger batch")?;
        Ok(RepositoryBatch { tx })
    }

    async fn ledger_snapshot(&self) -> Result<(Vec<Account>, Vec<Transaction>)> {
        // Both reads run in one transaction, so they see the same snapshot.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin snapshot")?;

        let query = format!(
            "SELECT {} FROM accounts ORDER BY created_at, rowid",
            ACCOUNT_COLUMNS
        );
        let account_rows = sqlx::query(&query)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to read accounts")?;

        let query = format!(
            "SELECT {} FROM transactions ORDER BY rowid",
            TRANSACTION_COLUMNS
        );
        let transaction_rows = sqlx::query(&query)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to read transactions")?;

        tx.commit().await.context("Failed to end snapshot")?;

        let accounts = account_rows
            .iter()
            .map(Self::row_to_account)
            .collect::<Result<Vec<_>>>()?;
        let transactions = transaction_rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?;
        Ok((accounts, transactions))
    }
}

/// One SQLite transaction holding staged ledger writes.
///
/// The transaction is opened deferred and its first statement is always a
/// balance update, so the write lock is requested before any read snapshot
/// exists and a busy database is waited for instead of failing.
pub struct RepositoryBatch {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl LedgerBatch for RepositoryBatch {
    async fn compare_and_set_balance(
        &mut self,
        id: AccountId,
        expected: Cents,
        new: Cents,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = ?
            WHERE id = ? AND balance = ? AND status = 'active'
            "#,
        )
        .bind(new)
        .bind(id.to_string())
        .bind(expected)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update account balance")?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        insert_transaction(&mut *self.tx, transaction)
            .await
            .context("Failed to save transaction")
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit ledger batch")
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back ledger batch")
    }
}

async fn insert_transaction<'e, E>(executor: E, transaction: &Transaction) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO transactions
            (id, kind, source_account_id, destination_account_id,
             amount, currency, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(transaction.id.to_string())
    .bind(transaction.kind.as_str())
    .bind(transaction.source_account_id.to_string())
    .bind(transaction.destination_account_id.map(|id| id.to_string()))
    .bind(transaction.amount)
    .bind(transaction.currency.as_str())
    .bind(transaction.status.as_str())
    .bind(transaction.created_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn test_repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("repo.db");
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let repo = Repository::init(&url).await.unwrap();
        (repo, temp_dir)
    }

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    #[tokio::test]
    async fn test_open_account_with_opening_deposit() {
        let (repo, _temp) = test_repo().await;
        let customer = Customer::new("Grace").with_city("Arlington");
        repo.save_customer(&customer).await.unwrap();

        let account = Account::new(customer.id, usd(), 2500);
        let deposit = Transaction::deposit(account.id, 2500, usd())
            .with_status(TransactionStatus::Completed);
        repo.open_account(&account, Some(&deposit)).await.unwrap();

        assert_eq!(repo.get_account(account.id).await.unwrap(), Some(account.clone()));
        let history = repo.list_transactions_for_account(account.id).await.unwrap();
        assert_eq!(history, vec![deposit]);
    }

    #[tokio::test]
    async fn test_open_account_rejects_unknown_owner() {
        let (repo, _temp) = test_repo().await;
        let account = Account::new(Uuid::new_v4(), usd(), 0);

        assert!(repo.open_account(&account, None).await.is_err());
        assert!(repo.get_account(account.id).await.unwrap().is_none());
    }

    async fn open(repo: &Repository, balance: Cents) -> Account {
        let customer = Customer::new("Linus");
        repo.save_customer(&customer).await.unwrap();
        let account = Account::new(customer.id, usd(), balance);
        repo.open_account(&account, None).await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_batch_compare_and_set_balance() {
        let (repo, _temp) = test_repo().await;
        let account = open(&repo, 100).await;

        let mut batch = repo.begin_batch().await.unwrap();
        assert!(batch.compare_and_set_balance(account.id, 100, 150).await.unwrap());
        // Stale expectation does not write
        assert!(!batch.compare_and_set_balance(account.id, 100, 10).await.unwrap());
        batch.commit().await.unwrap();
        assert_eq!(repo.get_account(account.id).await.unwrap().unwrap().balance, 150);

        repo.set_account_status(account.id, AccountStatus::Inactive)
            .await
            .unwrap();
        let mut batch = repo.begin_batch().await.unwrap();
        assert!(!batch.compare_and_set_balance(account.id, 150, 200).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_is_invisible_until_commit() {
        let (repo, _temp) = test_repo().await;
        let account = open(&repo, 100).await;
        let withdrawal = Transaction::withdrawal(account.id, 40, usd())
            .with_status(TransactionStatus::Completed);

        let mut batch = repo.begin_batch().await.unwrap();
        assert!(batch.compare_and_set_balance(account.id, 100, 60).await.unwrap());
        batch.append_transaction(&withdrawal).await.unwrap();

        assert_eq!(repo.get_account(account.id).await.unwrap().unwrap().balance, 100);
        assert!(repo.get_transaction(withdrawal.id).await.unwrap().is_none());

        batch.commit().await.unwrap();
        let (accounts, transactions) = repo.ledger_snapshot().await.unwrap();
        assert_eq!(accounts[0].balance, 60);
        assert_eq!(transactions, vec![withdrawal]);
    }

    #[tokio::test]
    async fn test_dropped_batch_is_discarded() {
        let (repo, _temp) = test_repo().await;
        let account = open(&repo, 100).await;

        let mut batch = repo.begin_batch().await.unwrap();
        assert!(batch.compare_and_set_balance(account.id, 100, 0).await.unwrap());
        drop(batch);

        let mut batch = repo.begin_batch().await.unwrap();
        assert!(batch.compare_and_set_balance(account.id, 100, 90).await.unwrap());
        batch.rollback().await.unwrap();

        assert_eq!(repo.get_account(account.id).await.unwrap().unwrap().balance, 100);
        assert!(repo.list_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_customer() {
        let (repo, _temp) = test_repo().await;
        let mut customer = Customer::new("Ken");
        repo.save_customer(&customer).await.unwrap();

        customer.zipcode = Some("07974".to_string());
        assert!(repo.update_customer(&customer).await.unwrap());
        assert!(!repo.update_customer(&Customer::new("Nobody")).await.unwrap());

        let stored = repo.get_customer(customer.id).await.unwrap().unwrap();
        assert_eq!(stored.zipcode.as_deref(), Some("07974"));
        assert_eq!(repo.list_customers().await.unwrap().len(), 1);
    }
}
