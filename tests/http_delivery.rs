use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use parking_lot::Mutex;

use ledger_pubsub::{
    pubsub::DELIVERY_OK, HttpConfig, HttpPublisher, Message, PublishRequest, PublishSettings,
    Publisher, Subscription, SubscriptionRequest,
};

const ADDRESS: &str = "c0ffee01";

/// Запросы, принятые тестовым endpoint-ом.
#[derive(Clone, Default)]
struct Received {
    requests: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
    status: StatusCode,
}

impl Received {
    fn count(&self) -> usize {
        self.requests.lock().len()
    }

    fn bodies(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .iter()
            .map(|(_, body)| serde_json::from_slice(body).unwrap())
            .collect()
    }

    fn headers(&self) -> Vec<HeaderMap> {
        self.requests
            .lock()
            .iter()
            .map(|(h, _)| h.clone())
            .collect()
    }
}

async fn hook(
    State(rx): State<Received>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    rx.requests.lock().push((headers, body));
    rx.status
}

async fn spawn_endpoint_with_status(status: StatusCode) -> (String, Received) {
    let rx = Received {
        status,
        ..Default::default()
    };
    let app = Router::new()
        .route("/hook", post(hook))
        .with_state(rx.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), rx)
}

async fn spawn_endpoint() -> (String, Received) {
    spawn_endpoint_with_status(StatusCode::OK).await
}

fn unreachable_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/hook")
}

/// Endpoint, который принимает соединение и сразу его закрывает.
/// Возвращает адрес и счётчик принятых соединений.
async fn spawn_dropping_endpoint() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (format!("http://{addr}/hook"), accepted)
}

fn publisher(settings: PublishSettings) -> Arc<HttpPublisher> {
    let http = HttpConfig {
        request_timeout_ms: 2_000,
        connect_timeout_ms: 500,
    };
    HttpPublisher::new(settings, &http).unwrap()
}

fn sub(endpoint: &str) -> Subscription {
    Subscription::new(endpoint, HashMap::new(), ADDRESS).unwrap()
}

/// Тест проверяет частичный отказ: три подписки, вторая недоступна.
/// Ответ содержит результаты в порядке регистрации, счётчик ошибок растёт
/// только у второй подписки.
#[tokio::test]
async fn test_partial_failure_keeps_registration_order() {
    let p = publisher(PublishSettings::default());
    let topic = p.create_topic("transactions").unwrap();

    let (ep1, rx1) = spawn_endpoint().await;
    let ep2 = unreachable_endpoint();
    let (ep3, rx3) = spawn_endpoint().await;

    let h1 = topic.subscribe(sub(&ep1)).unwrap();
    let h2 = topic.subscribe(sub(&ep2)).unwrap();
    let h3 = topic.subscribe(sub(&ep3)).unwrap();

    let request = PublishRequest::new(
        "transactions",
        vec![Message::new("tx-1"), Message::new("tx-2")],
    );
    let resp = p.publish(request).await.unwrap();

    assert_eq!(resp.len(), 3);
    assert_eq!(resp.message_results[0], DELIVERY_OK);
    assert_ne!(resp.message_results[1], DELIVERY_OK);
    assert!(resp.message_results[1].contains(&ep2));
    assert_eq!(resp.message_results[2], DELIVERY_OK);
    assert_eq!(resp.failures(), 1);

    assert_eq!(topic.subscription(&h1).unwrap().err_count(), 0);
    assert_eq!(topic.subscription(&h2).unwrap().err_count(), 1);
    assert_eq!(topic.subscription(&h3).unwrap().err_count(), 0);

    for rx in [&rx1, &rx3] {
        let bodies = rx.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(
            bodies[0],
            vec![Message::new("tx-1"), Message::new("tx-2")]
        );
    }
}

/// Тест проверяет полный путь: `Topic::publish` → бандлер → HTTP.
/// Все future бандла получают один и тот же ответ.
#[tokio::test]
async fn test_topic_publish_end_to_end() {
    let p = publisher(PublishSettings {
        count_threshold: 3,
        delay_threshold: Duration::from_secs(60),
        ..Default::default()
    });
    let topic = p.create_topic("gossip").unwrap();
    let (endpoint, rx) = spawn_endpoint().await;
    topic.subscribe(sub(&endpoint)).unwrap();

    let results: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|body| topic.publish(Message::new(body)))
        .collect();

    let mut responses = Vec::new();
    for res in &results {
        let resp = res.wait_timeout(Duration::from_secs(5)).await.unwrap();
        responses.push(resp);
    }

    assert_eq!(responses[0].message_results, vec![DELIVERY_OK.to_string()]);
    assert!(Arc::ptr_eq(&responses[0], &responses[1]));
    assert!(Arc::ptr_eq(&responses[1], &responses[2]));

    let bodies = rx.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0],
        vec![Message::new("a"), Message::new("b"), Message::new("c")]
    );
}

/// Тест проверяет, что тело на проводе является JSON-массивом с телами в base64.
#[tokio::test]
async fn test_wire_format_is_base64_json() {
    let p = publisher(PublishSettings::default());
    let topic = p.create_topic("t").unwrap();
    let (endpoint, rx) = spawn_endpoint().await;
    topic.subscribe(sub(&endpoint)).unwrap();

    p.publish(PublishRequest::new("t", vec![Message::new("hello")]))
        .await
        .unwrap();

    let requests = rx.requests.lock();
    let raw: serde_json::Value = serde_json::from_slice(&requests[0].1).unwrap();
    assert_eq!(raw, serde_json::json!([{ "body": "aGVsbG8=" }]));
    assert_eq!(
        requests[0].0.get("content-type").unwrap(),
        "application/json"
    );
}

/// Тест проверяет передачу заголовков подписки как есть.
#[tokio::test]
async fn test_subscription_headers_are_sent() {
    let p = publisher(PublishSettings::default());
    let topic = p.create_topic("t").unwrap();
    let (endpoint, rx) = spawn_endpoint().await;

    let headers = HashMap::from([
        ("Authorization".to_string(), "Bearer token-1".to_string()),
        ("X-Ledger-Node".to_string(), "node-7".to_string()),
    ]);
    topic
        .subscribe(Subscription::new(&endpoint, headers, ADDRESS).unwrap())
        .unwrap();

    p.publish(PublishRequest::new("t", vec![Message::new("x")]))
        .await
        .unwrap();

    let seen = rx.headers();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("authorization").unwrap(), "Bearer token-1");
    assert_eq!(seen[0].get("x-ledger-node").unwrap(), "node-7");
}

/// Тест проверяет, что учитывается только транспорт: ответ 500 считается
/// успешной доставкой и счётчик ошибок не растёт.
#[tokio::test]
async fn test_error_status_counts_as_delivered() {
    let p = publisher(PublishSettings::default());
    let topic = p.create_topic("t").unwrap();
    let (endpoint, rx) = spawn_endpoint_with_status(StatusCode::INTERNAL_SERVER_ERROR).await;
    let hash = topic.subscribe(sub(&endpoint)).unwrap();

    let resp = p
        .publish(PublishRequest::new("t", vec![Message::new("x")]))
        .await
        .unwrap();

    assert!(resp.all_ok());
    assert_eq!(rx.count(), 1);
    assert_eq!(topic.subscription(&hash).unwrap().err_count(), 0);
}

/// Тест проверяет circuit breaker в смешанном топике: удаляется только
/// отказывающая подписка, рабочая продолжает получать сообщения.
#[tokio::test]
async fn test_breaker_removes_only_failing_subscription() {
    let p = publisher(PublishSettings {
        error_threshold: 2,
        ..Default::default()
    });
    let topic = p.create_topic("t").unwrap();
    let (endpoint, rx) = spawn_endpoint().await;
    let good = topic.subscribe(sub(&endpoint)).unwrap();
    let bad = topic.subscribe(sub(&unreachable_endpoint())).unwrap();

    for _ in 0..2 {
        let resp = p
            .publish(PublishRequest::new("t", vec![Message::new("x")]))
            .await
            .unwrap();
        assert_eq!(resp.len(), 2);
    }

    assert!(topic.subscription(&bad).is_none());
    assert!(topic.subscription(&good).is_some());

    let resp = p
        .publish(PublishRequest::new("t", vec![Message::new("x")]))
        .await
        .unwrap();
    assert_eq!(resp.message_results, vec![DELIVERY_OK.to_string()]);
    assert_eq!(rx.count(), 3);
}

/// Тест проверяет регистрацию через внешний запрос.
#[tokio::test]
async fn test_register_subscription_request() {
    let p = publisher(PublishSettings::default());
    let topic = p.create_topic("ledger-events").unwrap();
    let (endpoint, rx) = spawn_endpoint().await;

    let request: SubscriptionRequest = serde_json::from_value(serde_json::json!({
        "topic": "ledger-events",
        "endpoint": endpoint,
        "address": ADDRESS,
    }))
    .unwrap();

    let hash = p.register(&request).unwrap();
    assert_eq!(hash.len(), 64);
    assert_eq!(topic.subscription(&hash).unwrap().endpoint, endpoint);

    p.publish(PublishRequest::new("ledger-events", vec![Message::new("e")]))
        .await
        .unwrap();
    assert_eq!(rx.count(), 1);

    let missing = SubscriptionRequest {
        topic: "nope".into(),
        ..request
    };
    assert!(p.register(&missing).is_err());
}

/// Тест проверяет, что `flush_all` дожимает недобранные бандлы до доставки.
#[tokio::test]
async fn test_flush_all_delivers_pending_bundles() {
    let p = publisher(PublishSettings {
        count_threshold: 100,
        delay_threshold: Duration::from_secs(60),
        ..Default::default()
    });
    let (endpoint, rx) = spawn_endpoint().await;
    for name in ["a", "b"] {
        let topic = p.create_topic(name).unwrap();
        topic.subscribe(sub(&endpoint)).unwrap();
    }

    let ra = p.get_topic("a").unwrap().publish(Message::new("1"));
    let rb = p.get_topic("b").unwrap().publish(Message::new("2"));
    assert!(!ra.is_ready());

    p.flush_all().await;

    assert!(ra.is_ready());
    assert!(rb.is_ready());
    assert_eq!(rx.count(), 2);
}

/// Тест проверяет, что конкурентные бандлы не превышают порог ошибок:
/// при `error_threshold = 3` отказывающий endpoint получает ровно три
/// попытки, даже если десять бандлов доставляются параллельно.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_breaker_bounds_attempts_across_concurrent_bundles() {
    let p = publisher(PublishSettings {
        count_threshold: 1,
        concurrency_limit: 8,
        error_threshold: 3,
        delay_threshold: Duration::from_secs(60),
        ..Default::default()
    });
    let topic = p.create_topic("t").unwrap();
    let (endpoint, accepted) = spawn_dropping_endpoint().await;
    topic.subscribe(sub(&endpoint)).unwrap();

    let results: Vec<_> = (0..10)
        .map(|i| topic.publish(Message::new(format!("m{i}"))))
        .collect();

    let mut attempted = 0;
    for res in &results {
        let resp = res.wait_timeout(Duration::from_secs(10)).await.unwrap();
        match resp.len() {
            0 => {}
            1 => {
                assert_ne!(resp.message_results[0], DELIVERY_OK);
                attempted += 1;
            }
            n => panic!("unexpected response length {n}"),
        }
    }

    assert_eq!(attempted, 3);
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
    assert_eq!(topic.subscription_count(), 0);
}
