use std::{collections::HashMap, hint::black_box};

use criterion::{criterion_group, criterion_main, Criterion};
use ledger_pubsub::{pubsub::compute_hash, Message, PublishRequest, Subscription};
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn bench_compute_hash(c: &mut Criterion) {
    let address = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
    c.bench_function("subscription_compute_hash", |b| {
        b.iter(|| {
            compute_hash(
                black_box(address),
                black_box("https://hooks.example.com/ledger"),
                black_box(1_700_000_000_000),
            )
            .unwrap()
        })
    });
}

fn bench_subscription_json(c: &mut Criterion) {
    let headers = HashMap::from([("Authorization".to_string(), "Bearer abc".to_string())]);
    let sub = Subscription::new("https://hooks.example.com/ledger", headers, "abcdef01").unwrap();
    let json = serde_json::to_string(&sub).unwrap();

    c.bench_function("subscription_from_json", |b| {
        b.iter(|| {
            let parsed: Subscription = serde_json::from_str(black_box(&json)).unwrap();
            black_box(parsed)
        })
    });
}

fn bench_messages_bytes(c: &mut Criterion) {
    let mut rng = SmallRng::seed_from_u64(42);
    let messages = (0..100)
        .map(|_| {
            let body: Vec<u8> = (0..256).map(|_| rng.gen()).collect();
            Message::new(body)
        })
        .collect();
    let request = PublishRequest::new("bench", messages);

    c.bench_function("publish_request_100x256_to_json", |b| {
        b.iter(|| black_box(request.messages_bytes().unwrap()))
    });
}

criterion_group!(
    benches,
    bench_compute_hash,
    bench_subscription_json,
    bench_messages_bytes
);
criterion_main!(benches);
