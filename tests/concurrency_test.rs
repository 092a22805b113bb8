mod common;

use std::sync::Arc;

use anyhow::Result;
use bankcore::application::LedgerError;
use common::{StandardAccounts, balance_of, test_service, usd};

const TASKS: usize = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_effects_on_one_account_are_exact() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let owner = StandardAccounts::customer(&service, "Ada Lovelace").await?;
    let account = StandardAccounts::open(&service, owner.id, usd(), 0).await?;
    let account_id = account.id;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.ledger().apply_effect(account_id, 25).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(balance_of(&service, account_id).await?, 25 * TASKS as i64);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let owner = StandardAccounts::customer(&service, "Ada Lovelace").await?;
    let account = StandardAccounts::open(&service, owner.id, usd(), 1000).await?;
    let account_id = account.id;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.transactions().withdraw(account_id, 100).await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => completed += 1,
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(completed, 10);
    assert_eq!(balance_of(&service, account_id).await?, 0);
    assert!(service.check_integrity().await?.is_healthy());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (x, y) = StandardAccounts::pair(&service).await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for i in 0..TASKS {
        let service = Arc::clone(&service);
        let (from, to) = if i % 2 == 0 { (x.id, y.id) } else { (y.id, x.id) };
        handles.push(tokio::spawn(async move {
            service.transactions().transfer(from, to, 10).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    // Equal numbers each way cancel out.
    assert_eq!(balance_of(&service, x.id).await?, 1000);
    assert_eq!(balance_of(&service, y.id).await?, 500);

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.total_balance, 1500);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_transfers_run_together() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (a, b) = StandardAccounts::pair(&service).await?;
    let (c, d) = StandardAccounts::pair(&service).await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for i in 0..TASKS {
        let service = Arc::clone(&service);
        let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (c.id, d.id) };
        handles.push(tokio::spawn(async move {
            service.transactions().transfer(from, to, 5).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let moved = 5 * (TASKS as i64 / 2);
    assert_eq!(balance_of(&service, a.id).await?, 1000 - moved);
    assert_eq!(balance_of(&service, b.id).await?, 500 + moved);
    assert_eq!(balance_of(&service, c.id).await?, 1000 - moved);
    assert_eq!(balance_of(&service, d.id).await?, 500 + moved);

    // Lock entries are released once every transfer is done.
    assert_eq!(service.ledger().locks().tracked(), 0);
    assert!(service.check_integrity().await?.is_healthy());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_half_a_transfer() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (x, y) = StandardAccounts::pair(&service).await?;
    let (x_id, y_id) = (x.id, y.id);
    let service = Arc::new(service);

    let writer = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            for i in 0..200 {
                let (from, to) = if i % 2 == 0 { (x_id, y_id) } else { (y_id, x_id) };
                service.transactions().transfer(from, to, 10).await?;
            }
            Ok::<_, LedgerError>(())
        })
    };

    let mut polls = 0;
    while !writer.is_finished() {
        // One query, so both balances come from the same snapshot.
        let accounts = service.accounts().list_accounts().await?;
        let total: i64 = accounts
            .iter()
            .filter(|a| a.id == x_id || a.id == y_id)
            .map(|a| a.balance)
            .sum();
        assert_eq!(total, 1500, "a reader saw a partial transfer");

        let report = service.check_integrity().await?;
        assert!(report.is_healthy(), "issues: {:?}", report.issues);
        polls += 1;
        tokio::task::yield_now().await;
    }
    writer.await??;

    assert!(polls > 0);
    assert_eq!(balance_of(&service, x_id).await?, 1000);
    assert_eq!(balance_of(&service, y_id).await?, 500);
    Ok(())
}
