//! End to end pool behavior through the public API, with the maintenance
//! task running.

use alloy_primitives::{Address, U256};
use std::time::Duration;
use txpool::{
    maintain_transaction_pool,
    test_utils::{test_pool, MockTransaction},
    PoolTransaction, TxStatus,
};

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn promotes_out_of_order_submissions() {
    let (pool, chain) = test_pool();
    let task = tokio::spawn(maintain_transaction_pool(pool.clone()));

    let a = Address::random();
    chain.state().set_balance(a, U256::from(u128::MAX));

    // submitted out of order: the run only completes with the last one
    let gapped = MockTransaction::new(a, 2);
    let filler = MockTransaction::new(a, 1);
    let first = MockTransaction::new(a, 0);
    pool.add_remote(gapped.clone()).unwrap();
    pool.add_remote(filler.clone()).unwrap();
    assert_eq!(pool.stats(), (0, 2));

    pool.add_remote(first.clone()).unwrap();
    pool.sync().await;

    assert_eq!(pool.stats(), (3, 0));
    assert_eq!(pool.status(&gapped.hash()), TxStatus::Pending);
    let pending = pool.pending(false);
    let nonces = pending[&a].iter().map(|tx| tx.nonce()).collect::<Vec<_>>();
    assert_eq!(nonces, vec![0, 1, 2]);

    pool.close().await;
    task.await.unwrap();
}

#[tokio::test]
async fn publishes_events_for_promoted_transactions() {
    let (pool, chain) = test_pool();
    let task = tokio::spawn(maintain_transaction_pool(pool.clone()));
    let mut events = pool.subscribe_new_txs();

    let a = Address::random();
    chain.state().set_balance(a, U256::from(u128::MAX));

    let second = MockTransaction::new(a, 1);
    let first = MockTransaction::new(a, 0);
    pool.add_remote(second.clone()).unwrap();
    pool.add_remote(first.clone()).unwrap();
    pool.sync().await;

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("promotion events published")
            .expect("pool alive");
        seen.extend(event.txs.iter().map(|tx| tx.hash()));
    }
    assert!(seen.contains(&first.hash()));
    assert!(seen.contains(&second.hash()));

    pool.close().await;
    task.await.unwrap();
}

#[tokio::test]
async fn head_events_drop_mined_and_reinject_reorged() {
    let (pool, chain) = test_pool();
    let task = tokio::spawn(maintain_transaction_pool(pool.clone()));

    let a = Address::random();
    chain.state().set_balance(a, U256::from(u128::MAX));

    let tx = MockTransaction::new(a, 0);
    pool.add_remote(tx.clone()).unwrap();
    pool.sync().await;
    assert_eq!(pool.status(&tx.hash()), TxStatus::Pending);

    // the transaction gets mined: the pool forgets it on the next head
    let genesis = chain.genesis();
    let b1 = chain.make_block(&genesis, vec![tx.clone()]);
    chain.state().set_nonce(a, 1);
    chain.set_head(b1.clone());
    {
        let pool = pool.clone();
        let hash = tx.hash();
        wait_until(move || !pool.contains(&hash)).await;
    }

    // the chain switches to a branch without it: the pool takes it back
    let b2 = chain.make_block(&genesis, vec![]);
    chain.state().set_nonce(a, 0);
    chain.set_head(b2);
    {
        let pool = pool.clone();
        let hash = tx.hash();
        wait_until(move || pool.status(&hash) == TxStatus::Pending).await;
    }

    pool.close().await;
    task.await.unwrap();
}

#[tokio::test]
async fn close_stops_the_maintenance_task() {
    let (pool, _chain) = test_pool();
    let task = tokio::spawn(maintain_transaction_pool(pool.clone()));

    pool.sync().await;
    pool.close().await;
    task.await.unwrap();

    // late submissions still validate, they just wait for no one
    let a = Address::random();
    assert!(pool.add_remote(MockTransaction::new(a, 0)).is_err());
}
