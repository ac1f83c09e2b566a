use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gridsync_collab::{
    BusConfig, DocumentIdentity, LocalRelay, MessageBus, Notification, NotificationKind,
    RelayService, Revision,
};
use serde_json::json;
use std::sync::Arc;

fn bench_revision_envelope(c: &mut Criterion) {
    let payload = json!({
        "type": "UPDATE_CELL",
        "sheet": "Sheet1",
        "col": 3,
        "row": 7,
        "content": "=SUM(A1:A4)"
    });

    c.bench_function("revision_envelope", |b| {
        b.iter(|| black_box(Revision::new(black_box(payload.clone()))))
    });
}

fn bench_bus_fan_out(c: &mut Criterion) {
    let bus = MessageBus::new(BusConfig { capacity: 2048 });
    let _subs: Vec<_> = (0..100)
        .map(|_| bus.subscribe(NotificationKind::SpreadsheetMessage))
        .collect();
    let doc = DocumentIdentity::new("bench.model", 1);

    c.bench_function("bus_notify_100_subscribers", |b| {
        b.iter(|| {
            black_box(bus.notify(Notification::SpreadsheetMessage {
                document: doc.clone(),
                revision: Revision::new(json!({"n": 1})),
            }))
        })
    });
}

fn bench_relay_dispatch_accept(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = Arc::new(MessageBus::with_defaults());
    let relay = LocalRelay::with_defaults(bus);
    let doc = DocumentIdentity::new("bench.model", 1);

    c.bench_function("relay_dispatch_accept", |b| {
        b.iter(|| {
            rt.block_on(async {
                let revision = Revision::new(json!({"n": 1}));
                black_box(relay.dispatch_message(&doc, revision).await.unwrap());
            })
        })
    });
}

criterion_group!(
    benches,
    bench_revision_envelope,
    bench_bus_fan_out,
    bench_relay_dispatch_accept
);
criterion_main!(benches);
