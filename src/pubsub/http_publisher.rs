use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client,
};
use tracing::{debug, error, warn};

use super::{
    DeliveryPermit, PublishRequest, PublishResponse, PublishSettings, Publisher, Subscription,
    Topic, TopicRegistry, DELIVERY_OK,
};
use crate::{config::HttpConfig, PubSubError, PubSubResult};

/// Издатель, доставляющий пачки сообщений HTTP POST-запросами.
///
/// На каждую активную подписку топика уходит один запрос с телом:
/// JSON-массивом сообщений. Учитывается только успех транспорта: код
/// ответа не анализируется.
#[derive(Debug)]
pub struct HttpPublisher {
    me: Weak<HttpPublisher>,
    registry: TopicRegistry,
    client: Client,
}

impl HttpPublisher {
    /// Создаёт издателя с HTTP-клиентом, настроенным по `http`.
    pub fn new(
        settings: PublishSettings,
        http: &HttpConfig,
    ) -> PubSubResult<Arc<Self>> {
        let client = Client::builder()
            .timeout(Duration::from_millis(http.request_timeout_ms))
            .connect_timeout(Duration::from_millis(http.connect_timeout_ms))
            .build()
            .map_err(|e| PubSubError::Config(e.to_string()))?;
        Ok(Self::with_client(settings, client))
    }

    /// Создаёт издателя с готовым клиентом.
    pub fn with_client(
        settings: PublishSettings,
        client: Client,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            registry: TopicRegistry::new(settings),
            client,
        })
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Сбрасывает буферы всех топиков и ждёт завершения доставки.
    pub async fn flush_all(&self) {
        for topic in self.registry.topics() {
            topic.flush().await;
        }
    }

    async fn deliver(
        &self,
        sub: &Subscription,
        body: Bytes,
    ) -> PubSubResult<()> {
        let headers = build_headers(sub)?;
        let response = self
            .client
            .post(&sub.endpoint)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| PubSubError::delivery(&sub.endpoint, e))?;

        if !response.status().is_success() {
            debug!(
                endpoint = %sub.endpoint,
                status = %response.status(),
                "endpoint answered with non-success status"
            );
        }
        Ok(())
    }

    /// Одна попытка доставки в подписку в пределах её бюджета ошибок.
    ///
    /// `None` означает, что подписку удалили, пока попытка ждала разрешения:
    /// такая подписка не попадает в ответ.
    async fn attempt(
        &self,
        topic: &Topic,
        sub: &Subscription,
        body: Bytes,
    ) -> Option<String> {
        let permit = topic.begin_delivery(sub.hash()).await?;
        match self.deliver(sub, body).await {
            Ok(()) => Some(DELIVERY_OK.to_string()),
            Err(e) => {
                let text = e.to_string();
                self.handle_failure(topic, permit, &e);
                Some(text)
            }
        }
    }

    /// Учитывает ошибку доставки и размыкает подписку по достижении порога.
    fn handle_failure(
        &self,
        topic: &Topic,
        permit: DeliveryPermit,
        err: &PubSubError,
    ) {
        let hash = permit.hash().to_string();
        let updated = match topic.fail_delivery(permit) {
            Ok(updated) => updated,
            Err(e) => {
                error!(topic = topic.name(), hash = %hash, error = %e, "unable to record failure");
                return;
            }
        };

        debug!(
            topic = topic.name(),
            hash = %hash,
            err_count = updated.err_count(),
            error = %err,
            "delivery failed"
        );

        let threshold = topic.settings().error_threshold;
        if updated.is_tripped(threshold) {
            warn!(
                topic = topic.name(),
                hash = %hash,
                endpoint = %updated.endpoint,
                err_count = updated.err_count(),
                threshold,
                "circuit breaker tripped, removing subscription"
            );
            if let Err(e) = topic.unsubscribe(&hash) {
                error!(topic = topic.name(), hash = %hash, error = %e, "unable to unsubscribe");
            }
        }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
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
        let body = Bytes::from(request.messages_bytes()?);
        let subs = topic.subscriptions();

        // Доставки независимы: отказ одной не отменяет остальные.
        let outcomes = join_all(
            subs.iter()
                .map(|sub| self.attempt(&topic, sub, body.clone())),
        )
        .await;
        let results: Vec<String> = outcomes.into_iter().flatten().collect();

        Ok(PublishResponse::new(results))
    }
}

/// Заголовки подписки поверх `Content-Type: application/json`;
/// одноимённый заголовок подписки заменяет значение по умолчанию.
fn build_headers(sub: &Subscription) -> PubSubResult<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(sub.headers.len() + 1);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (key, value) in &sub.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| PubSubError::delivery(&sub.endpoint, format!("header '{key}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PubSubError::delivery(&sub.endpoint, format!("header '{key}': {e}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}
