use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{
    BundleHandler, Bundler, BundlerSettings, Message, PublishRequest, PublishResult, Publisher,
    Rejected, Subscription,
};
use crate::{PubSubError, PubSubResult};

/// Настройки публикации топика.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    /// Максимальная задержка буферизации до принудительного сброса.
    pub delay_threshold: Duration,
    /// Максимальный размер бандла.
    pub count_threshold: usize,
    /// Максимум одновременных обработчиков бандлов; `0` означает `25 × num_cpus`.
    pub concurrency_limit: usize,
    /// Кол-во ошибок доставки, после которого подписка удаляется.
    pub error_threshold: u64,
    /// Лимит байт сообщений, ожидающих доставки.
    pub buffered_byte_limit: usize,
}

/// Именованный канал: реестр подписчиков и лениво создаваемый бандлер.
pub struct Topic {
    name: Arc<str>,
    settings: PublishSettings,
    /// Порядок регистрации определяет порядок результатов в `PublishResponse`.
    subscriptions: RwLock<IndexMap<String, Registered>>,
    publisher: Weak<dyn Publisher>,
    bundler: OnceCell<Bundler<BundledMessage>>,
}

/// Запись реестра: подписка и её бюджет попыток доставки.
///
/// В бюджете `error_threshold - errCount` разрешений. Успешная попытка
/// возвращает разрешение, неудачная сжигает его, поэтому одновременно
/// выполняется не больше попыток, чем осталось до срабатывания breaker-а.
struct Registered {
    sub: Subscription,
    attempts: Arc<Semaphore>,
}

/// Разрешение на одну попытку доставки подписке.
///
/// При успехе разрешение просто отпускается; неудачу нужно отдать в
/// [`Topic::fail_delivery`].
#[derive(Debug)]
pub struct DeliveryPermit {
    hash: String,
    permit: OwnedSemaphorePermit,
}

/// Сообщение в буфере бандлера вместе с его future.
pub(crate) struct BundledMessage {
    msg: Message,
    res: ResultGuard,
}

/// Future сообщения внутри бандлера.
///
/// Если бандл пропал без ответа (паника издателя, отмена задачи, удаление
/// топика с непустым буфером), ожидающие получают `PublisherClosed`.
struct ResultGuard(PublishResult);

/// Обработчик бандлов топика: одна публикация на бандл, один результат
/// на все сообщения бандла.
struct TopicFlusher {
    topic: Arc<str>,
    publisher: Weak<dyn Publisher>,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            delay_threshold: Duration::from_millis(10),
            count_threshold: 100,
            concurrency_limit: 0,
            error_threshold: 5,
            buffered_byte_limit: 1 << 30,
        }
    }
}

impl PublishSettings {
    /// Фактический размер пула обработчиков.
    pub fn handler_limit(&self) -> usize {
        if self.concurrency_limit > 0 {
            self.concurrency_limit
        } else {
            25 * num_cpus::get()
        }
    }

    pub fn bundler_settings(&self) -> BundlerSettings {
        BundlerSettings {
            delay_threshold: self.delay_threshold,
            count_threshold: self.count_threshold,
            handler_limit: self.handler_limit(),
            buffered_byte_limit: self.buffered_byte_limit,
        }
    }
}

impl Topic {
    pub fn new(
        name: impl Into<Arc<str>>,
        settings: PublishSettings,
        publisher: Weak<dyn Publisher>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            subscriptions: RwLock::new(IndexMap::new()),
            publisher,
            bundler: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Издатель, которому принадлежит топик, если он ещё жив.
    pub fn publisher(&self) -> Option<Arc<dyn Publisher>> {
        self.publisher.upgrade()
    }

    /// Публикует сообщение. Не ждёт сети: сообщение ставится в буфер
    /// бандлера, результат приходит через возвращённый future.
    ///
    /// Первый вызов создаёт бандлер ровно один раз даже при конкурентном
    /// первом использовании. Ошибки постановки (нет runtime, переполнение)
    /// сразу записываются в future.
    pub fn publish(
        &self,
        msg: Message,
    ) -> PublishResult {
        let bundler = match self.bundler() {
            Ok(bundler) => bundler,
            Err(e) => return PublishResult::resolved(Err(e)),
        };

        let res = PublishResult::new();
        let size = msg.len();
        let item = BundledMessage {
            msg,
            res: ResultGuard(res.clone()),
        };

        if let Err(Rejected { item, error }) = bundler.add(item, size) {
            warn!(topic = %self.name, error = %error, "message rejected by bundler");
            // Причина отказа записывается до того, как guard выставит PublisherClosed.
            let _ = res.set(Err(error));
            drop(item);
        }
        res
    }

    /// Сбрасывает буфер и ждёт доставки всех бандлов в обработке.
    pub async fn flush(&self) {
        if let Some(bundler) = self.bundler.get() {
            bundler.flush().await;
        }
    }

    /// Был ли уже создан бандлер.
    pub fn is_bundler_initialized(&self) -> bool {
        self.bundler.get().is_some()
    }

    fn bundler(&self) -> PubSubResult<&Bundler<BundledMessage>> {
        self.bundler.get_or_try_init(|| {
            debug!(topic = %self.name, "initializing bundler");
            let handler: Arc<dyn BundleHandler<BundledMessage>> = Arc::new(TopicFlusher {
                topic: Arc::clone(&self.name),
                publisher: self.publisher.clone(),
            });
            Bundler::new(self.settings.bundler_settings(), handler)
        })
    }

    /// Регистрирует подписку, вычисляя её hash при отсутствии.
    ///
    /// Повторная подписка с тем же hash обновляет только заголовки:
    /// счётчик ошибок зарегистрированной подписки сохраняется.
    ///
    /// # Ошибки
    /// `PubSubError::SubscriptionTripped`, если у новой подписки `errCount`
    /// уже достиг порога топика.
    pub fn subscribe(
        &self,
        mut sub: Subscription,
    ) -> PubSubResult<String> {
        if !sub.has_hash() {
            sub.make_hash()?;
        }
        let hash = sub.hash().to_string();
        let threshold = self.settings.error_threshold;

        let mut subs = self.subscriptions.write();
        if let Some(existing) = subs.get_mut(&hash) {
            existing.sub.headers = sub.headers;
            debug!(
                topic = %self.name,
                hash = %hash,
                err_count = existing.sub.err_count(),
                "subscription refreshed"
            );
            return Ok(hash);
        }

        if sub.is_tripped(threshold) {
            return Err(PubSubError::SubscriptionTripped(hash));
        }

        let budget = threshold
            .saturating_sub(sub.err_count())
            .min(Semaphore::MAX_PERMITS as u64) as usize;
        info!(
            topic = %self.name,
            hash = %hash,
            endpoint = %sub.endpoint,
            "subscription registered"
        );
        subs.insert(
            hash.clone(),
            Registered {
                sub,
                attempts: Arc::new(Semaphore::new(budget)),
            },
        );

        Ok(hash)
    }

    /// Полностью удаляет подписку из реестра.
    ///
    /// # Ошибки
    /// `PubSubError::SubscriptionNotFound`, если hash не зарегистрирован.
    pub fn unsubscribe(
        &self,
        hash: &str,
    ) -> PubSubResult<Subscription> {
        let removed = self.subscriptions.write().shift_remove(hash);
        match removed {
            Some(entry) => {
                // Ожидающие бюджета попытки завершаются без доставки.
                entry.attempts.close();
                info!(topic = %self.name, hash, "subscription removed");
                Ok(entry.sub)
            }
            None => Err(PubSubError::SubscriptionNotFound(hash.to_string())),
        }
    }

    /// Ждёт разрешения на попытку доставки подписке.
    ///
    /// Возвращает `None`, если подписка удалена до или во время ожидания.
    pub async fn begin_delivery(
        &self,
        hash: &str,
    ) -> Option<DeliveryPermit> {
        let attempts = {
            let subs = self.subscriptions.read();
            Arc::clone(&subs.get(hash)?.attempts)
        };
        let permit = attempts.acquire_owned().await.ok()?;
        Some(DeliveryPermit {
            hash: hash.to_string(),
            permit,
        })
    }

    /// Учитывает неудачную попытку: разрешение сжигается, счётчик растёт.
    /// Возвращает снимок подписки после учёта.
    pub fn fail_delivery(
        &self,
        permit: DeliveryPermit,
    ) -> PubSubResult<Subscription> {
        let DeliveryPermit { hash, permit } = permit;
        let mut subs = self.subscriptions.write();
        permit.forget();
        match subs.get_mut(&hash) {
            Some(entry) => {
                entry.sub.record_failure();
                Ok(entry.sub.clone())
            }
            None => Err(PubSubError::SubscriptionNotFound(hash)),
        }
    }

    /// Снимок активных подписок в порядке регистрации.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .values()
            .map(|entry| entry.sub.clone())
            .collect()
    }

    pub fn subscription(
        &self,
        hash: &str,
    ) -> Option<Subscription> {
        self.subscriptions
            .read()
            .get(hash)
            .map(|entry| entry.sub.clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl DeliveryPermit {
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl Drop for ResultGuard {
    fn drop(&mut self) {
        // Уже выставленный результат не перезаписывается.
        let _ = self.0.set(Err(PubSubError::PublisherClosed));
    }
}

impl fmt::Debug for Topic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("subscriptions", &self.subscription_count())
            .field("bundler_initialized", &self.is_bundler_initialized())
            .finish()
    }
}

#[async_trait]
impl BundleHandler<BundledMessage> for TopicFlusher {
    async fn handle(
        &self,
        bundle: Vec<BundledMessage>,
    ) {
        let (messages, results): (Vec<Message>, Vec<ResultGuard>) =
            bundle.into_iter().map(|bm| (bm.msg, bm.res)).unzip();

        let outcome = match self.publisher.upgrade() {
            Some(publisher) => publisher
                .publish(PublishRequest::new(self.topic.to_string(), messages))
                .await
                .map(Arc::new),
            None => Err(PubSubError::PublisherClosed),
        };

        match &outcome {
            Ok(resp) => debug!(
                topic = %self.topic,
                bundle_len = results.len(),
                targets = resp.len(),
                failures = resp.failures(),
                "bundle published"
            ),
            Err(e) => warn!(
                topic = %self.topic,
                bundle_len = results.len(),
                error = %e,
                "bundle publish failed"
            ),
        }

        for res in results {
            if res.0.set(outcome.clone()).is_err() {
                warn!(topic = %self.topic, "publish result was already set");
            }
        }
    }
}
