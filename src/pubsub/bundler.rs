use std::{
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{watch, Semaphore},
    task::JoinHandle,
};
use tracing::trace;

use crate::{PubSubError, PubSubResult};

/// Обработчик сброшенных бандлов.
///
/// Вызывается из пула воркеров бандлера; одновременно работает не больше
/// `handler_limit` обработчиков.
#[async_trait]
pub trait BundleHandler<T>: Send + Sync + 'static {
    async fn handle(
        &self,
        bundle: Vec<T>,
    );
}

/// Пороги бандлера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerSettings {
    /// Максимальная задержка от первого буферизованного элемента до сброса.
    pub delay_threshold: Duration,
    /// Максимальный размер бандла.
    pub count_threshold: usize,
    /// Максимальное число одновременно работающих обработчиков.
    pub handler_limit: usize,
    /// Лимит байт в буфере и в ещё не обработанных бандлах; при `0`
    /// отвергается любой непустой элемент.
    pub buffered_byte_limit: usize,
}

/// Элемент, не принятый бандлером, вместе с причиной отказа.
#[derive(Debug)]
pub struct Rejected<T> {
    pub item: T,
    pub error: PubSubError,
}

/// Движок пакетирования: копит элементы и сбрасывает их по количеству
/// или по таймеру, отдавая бандлы ограниченному пулу обработчиков.
pub struct Bundler<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Send + 'static> {
    settings: BundlerSettings,
    handler: Arc<dyn BundleHandler<T>>,
    state: Mutex<BufferState<T>>,
    permits: Arc<Semaphore>,
    /// Кол-во бандлов, отданных пулу и ещё не обработанных.
    in_flight: watch::Sender<usize>,
    runtime: Handle,
    bundles_flushed: AtomicU64,
    items_flushed: AtomicU64,
}

struct BufferState<T> {
    items: Vec<T>,
    /// Байты текущего буфера.
    pending_bytes: usize,
    /// Байты буфера плюс бандлов в обработке.
    total_bytes: usize,
    /// Номер поколения буфера; меняется при каждом сбросе.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

struct Bundle<T> {
    items: Vec<T>,
    bytes: usize,
}

/// Снимает бандл с учёта даже при панике обработчика.
struct InFlightGuard<T: Send + 'static> {
    inner: Arc<Inner<T>>,
    bytes: usize,
}

impl Default for BundlerSettings {
    fn default() -> Self {
        Self {
            delay_threshold: Duration::from_millis(10),
            count_threshold: 100,
            handler_limit: 25 * num_cpus::get(),
            buffered_byte_limit: 1 << 30,
        }
    }
}

impl<T: Send + 'static> Bundler<T> {
    /// Создаёт бандлер, привязанный к текущему tokio runtime.
    ///
    /// # Ошибки
    /// `PubSubError::NoRuntime`, если вызван вне контекста tokio.
    pub fn new(
        settings: BundlerSettings,
        handler: Arc<dyn BundleHandler<T>>,
    ) -> PubSubResult<Self> {
        let runtime = Handle::try_current().map_err(|_| PubSubError::NoRuntime)?;
        let settings = BundlerSettings {
            count_threshold: settings.count_threshold.max(1),
            handler_limit: settings.handler_limit.max(1),
            ..settings
        };
        let (in_flight, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(settings.handler_limit)),
                settings,
                handler,
                state: Mutex::new(BufferState {
                    items: Vec::new(),
                    pending_bytes: 0,
                    total_bytes: 0,
                    epoch: 0,
                    timer: None,
                }),
                in_flight,
                runtime,
                bundles_flushed: AtomicU64::new(0),
                items_flushed: AtomicU64::new(0),
            }),
        })
    }

    pub fn settings(&self) -> &BundlerSettings {
        &self.inner.settings
    }

    /// Добавляет элемент размером `size` байт.
    ///
    /// Первый элемент в пустом буфере взводит таймер задержки; достижение
    /// `count_threshold` сбрасывает буфер немедленно. Не блокируется:
    /// при занятых обработчиках бандл встаёт в очередь пула.
    ///
    /// # Ошибки
    /// `PubSubError::BundlerOverflow`, если элемент превысил бы
    /// `buffered_byte_limit`. Элемент не добавляется и возвращается
    /// вызывающему в [`Rejected`].
    pub fn add(
        &self,
        item: T,
        size: usize,
    ) -> Result<(), Rejected<T>> {
        let limit = self.inner.settings.buffered_byte_limit;
        let mut state = self.inner.state.lock();

        if state.total_bytes.saturating_add(size) > limit {
            return Err(Rejected {
                item,
                error: PubSubError::BundlerOverflow { limit },
            });
        }

        state.items.push(item);
        state.pending_bytes += size;
        state.total_bytes += size;

        if state.items.len() >= self.inner.settings.count_threshold {
            let bundle = take_bundle(&mut state, true);
            drop(state);
            Inner::dispatch(&self.inner, bundle);
        } else if state.items.len() == 1 {
            let epoch = state.epoch;
            state.timer = Some(Inner::arm_timer(&self.inner, epoch));
        }

        Ok(())
    }

    /// Сбрасывает текущий буфер и ждёт завершения всех бандлов в обработке.
    pub async fn flush(&self) {
        let bundle = {
            let mut state = self.inner.state.lock();
            if state.items.is_empty() {
                None
            } else {
                Some(take_bundle(&mut state, true))
            }
        };
        if let Some(bundle) = bundle {
            Inner::dispatch(&self.inner, bundle);
        }

        let mut rx = self.inner.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Кол-во элементов в буфере, ещё не отданных пулу.
    pub fn buffered(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Кол-во бандлов, ожидающих или проходящих обработку.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    pub fn bundles_flushed(&self) -> u64 {
        self.inner.bundles_flushed.load(Ordering::Relaxed)
    }

    pub fn items_flushed(&self) -> u64 {
        self.inner.items_flushed.load(Ordering::Relaxed)
    }
}

impl<T: Send + 'static> Inner<T> {
    fn arm_timer(
        this: &Arc<Self>,
        epoch: u64,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(this);
        let delay = this.settings.delay_threshold;

        this.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let bundle = {
                let mut state = inner.state.lock();
                // Буфер уже сброшен по количеству или явным flush.
                if state.epoch != epoch || state.items.is_empty() {
                    return;
                }
                take_bundle(&mut state, false)
            };
            trace!(bundle_len = bundle.items.len(), "delay threshold reached");
            Inner::dispatch(&inner, bundle);
        })
    }

    fn dispatch(
        this: &Arc<Self>,
        bundle: Bundle<T>,
    ) {
        this.in_flight.send_modify(|n| *n += 1);
        let inner = Arc::clone(this);

        this.runtime.spawn(async move {
            let guard = InFlightGuard {
                inner: Arc::clone(&inner),
                bytes: bundle.bytes,
            };
            // Семафор никогда не закрывается.
            let _permit = inner.permits.clone().acquire_owned().await.ok();

            let len = bundle.items.len() as u64;
            inner.handler.handle(bundle.items).await;

            inner.bundles_flushed.fetch_add(1, Ordering::Relaxed);
            inner.items_flushed.fetch_add(len, Ordering::Relaxed);
            drop(guard);
        });
    }
}

impl<T: Send + 'static> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.total_bytes = state.total_bytes.saturating_sub(self.bytes);
        }
        self.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Забирает буфер целиком и открывает новое поколение.
fn take_bundle<T>(
    state: &mut BufferState<T>,
    abort_timer: bool,
) -> Bundle<T> {
    let items = mem::take(&mut state.items);
    let bytes = mem::take(&mut state.pending_bytes);
    state.epoch = state.epoch.wrapping_add(1);

    if let Some(timer) = state.timer.take() {
        if abort_timer {
            timer.abort();
        }
    }

    Bundle { items, bytes }
}
