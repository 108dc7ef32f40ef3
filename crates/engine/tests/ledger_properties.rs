//! Concurrency properties of the mutation engine over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use common::{LocationId, ProductId};
use engine::{
    Deliver, EngineConfig, EngineError, InMemoryDirectory, Initialize, MutationEngine, Receive,
    Reconcile, Transfer,
};
use ledger_store::{
    InMemoryLedgerStore, LedgerStore, LedgerStoreExt, LedgerTx, MovementKind, MovementQuery,
    StockKey,
};
use notify::{InMemoryTransport, NotificationPublisher, PublisherConfig};

type Engine = MutationEngine<InMemoryLedgerStore, InMemoryDirectory>;

fn setup(store: InMemoryLedgerStore, config: EngineConfig) -> Arc<Engine> {
    let (publisher, _worker) =
        NotificationPublisher::spawn(InMemoryTransport::new(), PublisherConfig::default());
    Arc::new(MutationEngine::new(store, InMemoryDirectory::new(), publisher).with_config(config))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_never_oversell() {
    let store = InMemoryLedgerStore::new();
    let engine = setup(store.clone(), EngineConfig::default());
    let (p, l) = (ProductId::new(), LocationId::new());
    engine.initialize(Initialize::new(p, l, 10)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..30 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.deliver(Deliver::new(p, l, 1)).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(record) => {
                assert!(record.quantity >= 0);
                succeeded += 1;
            }
            Err(EngineError::InsufficientStock { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(store.quantity(&StockKey::new(p, l)).await.unwrap(), 0);

    let entries = engine
        .history(MovementQuery::for_product(p).kind(MovementKind::Delivery))
        .await
        .unwrap();
    assert_eq!(entries.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_size_deliveries_match_a_serial_order() {
    let store = InMemoryLedgerStore::new();
    let engine = setup(store.clone(), EngineConfig::default());
    let (p, l) = (ProductId::new(), LocationId::new());
    engine.initialize(Initialize::new(p, l, 20)).await.unwrap();

    let sizes = [7, 5, 3, 9, 2, 6, 4];
    let mut handles = Vec::new();
    for qty in sizes {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.deliver(Deliver::new(p, l, qty)).await.map(|_| qty)
        }));
    }

    let mut delivered = 0;
    for handle in handles {
        if let Ok(qty) = handle.await.unwrap() {
            delivered += qty;
        }
    }

    let remaining = store.quantity(&StockKey::new(p, l)).await.unwrap();
    assert!(remaining >= 0);
    assert_eq!(delivered + remaining, 20);

    let journaled: i64 = engine
        .history(MovementQuery::for_product(p))
        .await
        .unwrap()
        .iter()
        .map(|e| e.qty)
        .sum();
    assert_eq!(journaled, delivered);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_receives_create_one_record() {
    let store = InMemoryLedgerStore::new();
    let engine = setup(store.clone(), EngineConfig::default());
    let (p, l) = (ProductId::new(), LocationId::new());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.receive(Receive::new(p, l, 1)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.record_count().await, 1);
    assert_eq!(store.quantity(&StockKey::new(p, l)).await.unwrap(), 16);
    assert_eq!(store.movement_count().await, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_transfers_conserve_stock() {
    let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(50));
    let engine = setup(
        store.clone(),
        EngineConfig {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(3),
        },
    );
    let p = ProductId::new();
    let (a, b) = (LocationId::new(), LocationId::new());
    engine.initialize(Initialize::new(p, a, 50)).await.unwrap();
    engine.initialize(Initialize::new(p, b, 50)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
        handles.push(tokio::spawn(async move {
            engine.transfer(Transfer::new(p, from, to, 2)).await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(e) => assert!(e.is_retryable(), "unexpected error: {e}"),
        }
    }

    let qa = store.quantity(&StockKey::new(p, a)).await.unwrap();
    let qb = store.quantity(&StockKey::new(p, b)).await.unwrap();
    assert_eq!(qa + qb, 100);
    assert_eq!(store.movement_count().await, committed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_keys_do_not_wait_for_each_other() {
    let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(200));
    let engine = setup(store.clone(), EngineConfig::default());
    let p = ProductId::new();
    let held = LocationId::new();
    let free = LocationId::new();

    // Hold one key open in an uncommitted unit.
    let mut tx = store.begin().await.unwrap();
    tx.get_or_create(&StockKey::new(p, held)).await.unwrap();

    let record = engine.receive(Receive::new(p, free, 3)).await.unwrap();
    assert_eq!(record.quantity, 3);

    tx.rollback().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconcile_races_settle_on_one_count() {
    let store = InMemoryLedgerStore::new();
    let engine = setup(store.clone(), EngineConfig::default());
    let (p, l) = (ProductId::new(), LocationId::new());
    engine.receive(Receive::new(p, l, 10)).await.unwrap();

    let counts = [3, 8, 15];
    let mut handles = Vec::new();
    for counted in counts {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.reconcile(Reconcile::new(p, l, counted)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let final_qty = store.quantity(&StockKey::new(p, l)).await.unwrap();
    assert!(counts.contains(&final_qty));

    let adjustments = engine
        .history(MovementQuery::for_product(p).kind(MovementKind::Adjustment))
        .await
        .unwrap();
    assert_eq!(adjustments.len(), 3);
}
