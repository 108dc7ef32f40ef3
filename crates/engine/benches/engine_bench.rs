use common::{LocationId, ProductId};
use criterion::{Criterion, criterion_group, criterion_main};
use engine::{Deliver, InMemoryDirectory, Initialize, MutationEngine, Receive, Transfer};
use ledger_store::InMemoryLedgerStore;
use notify::{InMemoryTransport, NotificationPublisher, PublisherConfig};

fn engine(rt: &tokio::runtime::Runtime) -> MutationEngine<InMemoryLedgerStore, InMemoryDirectory> {
    let _guard = rt.enter();
    let (publisher, _worker) =
        NotificationPublisher::spawn(InMemoryTransport::new(), PublisherConfig::default());
    MutationEngine::new(InMemoryLedgerStore::new(), InMemoryDirectory::new(), publisher)
}

fn bench_receive(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = engine(&rt);
    let (p, l) = (ProductId::new(), LocationId::new());

    c.bench_function("engine/receive", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.receive(Receive::new(p, l, 1)).await.unwrap();
            });
        });
    });
}

fn bench_receive_deliver(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = engine(&rt);
    let (p, l) = (ProductId::new(), LocationId::new());

    c.bench_function("engine/receive_deliver", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.receive(Receive::new(p, l, 5)).await.unwrap();
                engine.deliver(Deliver::new(p, l, 5)).await.unwrap();
            });
        });
    });
}

fn bench_transfer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = engine(&rt);
    let p = ProductId::new();
    let (a, b) = (LocationId::new(), LocationId::new());
    rt.block_on(async {
        engine
            .initialize(Initialize::new(p, a, 1_000_000))
            .await
            .unwrap();
    });

    c.bench_function("engine/transfer", |bench| {
        bench.iter(|| {
            rt.block_on(async {
                engine.transfer(Transfer::new(p, a, b, 1)).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_receive, bench_receive_deliver, bench_transfer);
criterion_main!(benches);
