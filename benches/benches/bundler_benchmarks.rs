use std::{
    hint::black_box,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ledger_pubsub::{
    pubsub::{BundleHandler, Bundler, BundlerSettings, TopicRegistry, DELIVERY_OK},
    Message, PubSubResult, PublishRequest, PublishResponse, PublishSettings, Publisher, Topic,
};
use tokio::runtime::Runtime;

struct Noop;

#[async_trait]
impl BundleHandler<u64> for Noop {
    async fn handle(
        &self,
        bundle: Vec<u64>,
    ) {
        black_box(bundle);
    }
}

/// Издатель без сети: отвечает "Ok" на каждую подписку.
struct NullPublisher {
    me: Weak<NullPublisher>,
    registry: TopicRegistry,
}

#[async_trait]
impl Publisher for NullPublisher {
    fn create_topic(
        &self,
        name: &str,
    ) -> PubSubResult<Arc<Topic>> {
        let me: Weak<dyn Publisher> = self.me.clone();
        self.registry.create(name, me)
    }

    fn topic_exists(
        &self,
        name: &str,
    ) -> bool {
        self.registry.exists(name)
    }

    fn get_topic(
        &self,
        name: &str,
    ) -> PubSubResult<Arc<Topic>> {
        self.registry.get(name)
    }

    fn topic_names(&self) -> Vec<String> {
        self.registry.names()
    }

    async fn publish(
        &self,
        request: PublishRequest,
    ) -> PubSubResult<PublishResponse> {
        let topic = self.get_topic(&request.topic)?;
        Ok(PublishResponse::new(vec![
            DELIVERY_OK.to_string();
            topic.subscription_count()
        ]))
    }
}

fn bench_bundler_add(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let _guard = rt.enter();

    let mut group = c.benchmark_group("bundler_add_then_flush");
    for count in [1usize, 10, 100] {
        let handler: Arc<dyn BundleHandler<u64>> = Arc::new(Noop);
        let bundler = Bundler::new(
            BundlerSettings {
                delay_threshold: Duration::from_secs(60),
                count_threshold: count,
                ..Default::default()
            },
            handler,
        )
        .unwrap();

        group.throughput(Throughput::Elements(1_000));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.to_async(&rt).iter(|| async {
                for i in 0..1_000u64 {
                    bundler.add(black_box(i), 8).unwrap();
                }
                bundler.flush().await;
            });
        });
    }
    group.finish();
}

fn bench_topic_publish_wait(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let _guard = rt.enter();

    let publisher = Arc::new_cyclic(|me| NullPublisher {
        me: me.clone(),
        registry: TopicRegistry::new(PublishSettings {
            count_threshold: 100,
            delay_threshold: Duration::from_millis(1),
            ..Default::default()
        }),
    });
    let topic = publisher.create_topic("bench").unwrap();

    c.bench_function("topic_publish_100_and_wait", |b| {
        b.to_async(&rt).iter(|| async {
            let results: Vec<_> = (0..100)
                .map(|_| topic.publish(Message::new(&b"ledger-event"[..])))
                .collect();
            for res in &results {
                black_box(res.wait().await.unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_bundler_add, bench_topic_publish_wait);
criterion_main!(benches);
