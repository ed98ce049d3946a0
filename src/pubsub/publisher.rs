use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use super::{PublishRequest, PublishResponse, PublishSettings, SubscriptionRequest, Topic};
use crate::{PubSubError, PubSubResult};

/// Возможность публикации: управление топиками и доставка пачек сообщений.
///
/// `HttpPublisher` является единственной встроенной реализацией; другой транспорт
/// (очередь, RPC) подключается реализацией этого трейта.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Регистрирует новый топик, привязанный к этому издателю.
    ///
    /// # Ошибки
    /// `PubSubError::TopicAlreadyExists`, если имя занято.
    fn create_topic(
        &self,
        name: &str,
    ) -> PubSubResult<Arc<Topic>>;

    fn topic_exists(
        &self,
        name: &str,
    ) -> bool;

    /// # Ошибки
    /// `PubSubError::TopicNotFound`, если топика нет.
    fn get_topic(
        &self,
        name: &str,
    ) -> PubSubResult<Arc<Topic>>;

    /// Имена всех зарегистрированных топиков.
    fn topic_names(&self) -> Vec<String>;

    /// Доставляет пачку сообщений всем активным подпискам топика.
    async fn publish(
        &self,
        request: PublishRequest,
    ) -> PubSubResult<PublishResponse>;

    /// Регистрирует подписку из внешнего запроса, возвращает её hash.
    fn register(
        &self,
        request: &SubscriptionRequest,
    ) -> PubSubResult<String> {
        let topic = self.get_topic(&request.topic)?;
        let sub = request.to_subscription()?;
        topic.subscribe(sub)
    }
}

/// Реестр топиков, общий для реализаций [`Publisher`].
///
/// Проверка имени и вставка выполняются под одной блокировкой записи,
/// поэтому два конкурентных `create` с одним именем не проходят оба.
#[derive(Debug)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    defaults: PublishSettings,
}

impl TopicRegistry {
    pub fn new(defaults: PublishSettings) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    pub fn defaults(&self) -> &PublishSettings {
        &self.defaults
    }

    pub fn create(
        &self,
        name: &str,
        publisher: Weak<dyn Publisher>,
    ) -> PubSubResult<Arc<Topic>> {
        let mut topics = self.topics.write();
        if topics.contains_key(name) {
            return Err(PubSubError::TopicAlreadyExists(name.to_string()));
        }

        let topic = Arc::new(Topic::new(name, self.defaults.clone(), publisher));
        topics.insert(name.to_string(), Arc::clone(&topic));
        info!(topic = name, "topic created");

        Ok(topic)
    }

    pub fn exists(
        &self,
        name: &str,
    ) -> bool {
        self.topics.read().contains_key(name)
    }

    pub fn get(
        &self,
        name: &str,
    ) -> PubSubResult<Arc<Topic>> {
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PubSubError::TopicNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Все топики (для flush при остановке).
    pub fn topics(&self) -> Vec<Arc<Topic>> {
        self.topics.read().values().cloned().collect()
    }
}
