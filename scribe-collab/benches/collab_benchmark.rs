use criterion::{criterion_group, criterion_main, Criterion};
use scribe_collab::binding::EditorBinding;
use scribe_collab::delta::EditorDelta;
use scribe_collab::document::DEFAULT_TEXT_NAME;
use scribe_collab::protocol::Message;
use scribe_collab::registry::{ConnectionId, ConnectionRegistry};
use scribe_collab::relay::Relay;
use std::hint::black_box;
use std::sync::Arc;
use tokio::sync::mpsc;

fn local_update(binding: &EditorBinding, delta: &EditorDelta) -> Vec<u8> {
    match binding.apply_local_delta(delta) {
        Ok(Some(Message::Update(data))) => data,
        other => panic!("expected update, got {other:?}"),
    }
}

fn bench_message_encode(c: &mut Criterion) {
    let payload = vec![7u8; 64];

    c.bench_function("update_encode_64B", |b| {
        b.iter(|| {
            let msg = Message::update(black_box(payload.clone()));
            black_box(msg.encode());
        })
    });
}

fn bench_message_decode(c: &mut Criterion) {
    let encoded = Message::update(vec![7u8; 64]).encode();

    c.bench_function("update_decode_64B", |b| {
        b.iter(|| {
            black_box(Message::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_delta_parse(c: &mut Criterion) {
    let json = r#"{"ops":[{"retain":12},{"insert":"hello","attributes":{"bold":true}},{"delete":3}]}"#;

    c.bench_function("delta_from_json", |b| {
        b.iter(|| {
            black_box(EditorDelta::from_json(black_box(json)).unwrap());
        })
    });
}

fn bench_local_typing(c: &mut Criterion) {
    c.bench_function("binding_type_1000_chars", |b| {
        b.iter(|| {
            let binding = EditorBinding::new(DEFAULT_TEXT_NAME);
            for i in 0..1000u32 {
                let delta = EditorDelta::new().retain(i).insert("x");
                black_box(binding.apply_local_delta(&delta).unwrap());
            }
        })
    });
}

fn bench_remote_apply(c: &mut Criterion) {
    let author = EditorBinding::new(DEFAULT_TEXT_NAME);
    let update = local_update(&author, &EditorDelta::new().insert("remote paragraph"));

    c.bench_function("binding_remote_apply", |b| {
        b.iter(|| {
            let binding = EditorBinding::new(DEFAULT_TEXT_NAME);
            black_box(binding.on_remote_update(black_box(&update)).unwrap());
        })
    });
}

fn bench_broadcast_100_peers(c: &mut Criterion) {
    let mut registry = ConnectionRegistry::new();
    let mut receivers = Vec::new();
    for _ in 0..100 {
        let (tx, rx) = mpsc::channel(1024);
        registry.register(ConnectionId::new(), tx);
        receivers.push(rx);
    }
    let frame = Arc::new(Message::update(vec![0u8; 64]).encode());

    c.bench_function("broadcast_100_peers", |b| {
        b.iter(|| {
            black_box(registry.broadcast(frame.clone()));
            for rx in &mut receivers {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

fn bench_relay_update(c: &mut Criterion) {
    let author = EditorBinding::new(DEFAULT_TEXT_NAME);
    let frames: Vec<Vec<u8>> = (0..100u32)
        .map(|i| {
            let update = local_update(&author, &EditorDelta::new().retain(i).insert("y"));
            Message::update(update).encode()
        })
        .collect();

    c.bench_function("relay_apply_100_updates_10_peers", |b| {
        b.iter(|| {
            let mut relay = Relay::new(DEFAULT_TEXT_NAME);
            let mut receivers = Vec::new();
            let sender = ConnectionId::new();
            for i in 0..10 {
                let (tx, rx) = mpsc::channel(256);
                let id = if i == 0 { sender } else { ConnectionId::new() };
                relay.on_connect(id, tx).unwrap();
                receivers.push(rx);
            }
            for frame in &frames {
                relay.on_message(sender, black_box(frame)).unwrap();
            }
            black_box(relay.document().len());
        })
    });
}

criterion_group!(
    benches,
    bench_message_encode,
    bench_message_decode,
    bench_delta_parse,
    bench_local_typing,
    bench_remote_apply,
    bench_broadcast_100_peers,
    bench_relay_update,
);
criterion_main!(benches);
