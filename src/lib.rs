//! `ledger-pubsub`: topic-based publish/subscribe для раздачи событий
//! ledger-а внешним HTTP endpoint-ам.
//!
//! Сообщения топика копятся в бандлере и уходят пачками; каждая пачка
//! доставляется всем подпискам топика, а подписка, превысившая порог
//! ошибок, удаляется автоматически.

/// Загрузка настроек: файл, переменные окружения, значения по умолчанию.
pub mod config;
/// Ошибки и результат операций pub/sub.
pub mod error;
/// Гибкое логирование (форматы, фильтры, sinks).
pub mod logging;
/// Pub/Sub: топики, подписки, бандлер, HTTP-издатель.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Настройки узла.
pub use config::{HttpConfig, PublishConfig, Settings};
/// Ошибки операций.
pub use error::{PubSubError, PubSubResult};
/// Инициализация логирования.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Pub/Sub API.
pub use pubsub::{
    HttpPublisher, Message, PublishRequest, PublishResponse, PublishResult, PublishSettings,
    Publisher, Subscription, SubscriptionRequest, Topic,
};
