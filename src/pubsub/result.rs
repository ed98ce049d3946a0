use std::{fmt, sync::Arc, time::Duration};

use tokio::sync::watch;

use super::PublishResponse;
use crate::{PubSubError, PubSubResult};

/// Итог публикации, раздаваемый всем сообщениям одного бандла.
pub type PublishOutcome = Result<Arc<PublishResponse>, PubSubError>;

/// Future с однократным присваиванием, связывающий опубликованное
/// сообщение с результатом его доставки.
///
/// Клоны разделяют один слот: значение, записанное через [`set`](Self::set),
/// видят все ожидающие.
#[derive(Clone)]
pub struct PublishResult {
    slot: Arc<watch::Sender<Option<PublishOutcome>>>,
}

impl PublishResult {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Создаёт уже завершённый результат.
    pub(crate) fn resolved(outcome: PublishOutcome) -> Self {
        let (tx, _rx) = watch::channel(Some(outcome));
        Self { slot: Arc::new(tx) }
    }

    /// Записывает результат. Повторный вызов отвергается с
    /// `PubSubError::ResultAlreadySet`, первое значение сохраняется.
    pub fn set(
        &self,
        outcome: PublishOutcome,
    ) -> PubSubResult<()> {
        let stored = self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });

        if stored {
            Ok(())
        } else {
            Err(PubSubError::ResultAlreadySet)
        }
    }

    /// Проверяет готовность без ожидания.
    pub fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Возвращает записанный результат или `None`, если он ещё не готов.
    pub fn get(&self) -> Option<PublishOutcome> {
        self.slot.borrow().clone()
    }

    /// Ожидает готовности результата.
    pub async fn ready(&self) {
        let mut rx = self.slot.subscribe();
        // Sender живёт в self, поэтому канал не может закрыться во время ожидания.
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Ожидает и возвращает результат.
    pub async fn wait(&self) -> PublishOutcome {
        let mut rx = self.slot.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or(Err(PubSubError::PublisherClosed)),
            Err(_) => Err(PubSubError::PublisherClosed),
        };
        outcome
    }

    /// Как [`wait`](Self::wait), но не дольше `deadline`.
    ///
    /// По истечении возвращает `PubSubError::Timeout`; сам слот при этом
    /// не заполняется и может быть выставлен позже.
    pub async fn wait_timeout(
        &self,
        deadline: Duration,
    ) -> PublishOutcome {
        tokio::time::timeout(deadline, self.wait())
            .await
            .unwrap_or(Err(PubSubError::Timeout))
    }
}

impl Default for PublishResult {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PublishResult {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PublishResult")
            .field("ready", &self.is_ready())
            .finish()
    }
}
