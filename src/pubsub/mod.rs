//! Подсистема Publish–Subscribe (pub/sub) для раздачи событий ledger-а
//! внешним HTTP endpoint-ам.
//!
//! - `message`: сообщения, запрос и ответ публикации, формат на проводе.
//! - `result`: `PublishResult`, future с однократным присваиванием.
//! - `subscription`: подписки, вывод их идентичности, circuit breaker.
//! - `bundler`: пакетирование по количеству/задержке и пул обработчиков.
//! - `topic`: топик с реестром подписчиков и ленивым бандлером.
//! - `publisher`: трейт `Publisher` и общий реестр топиков.
//! - `http_publisher`: доставка HTTP POST-запросами.
//!
//! Поток управления: `Topic::publish` → бандлер → `Publisher::publish` на
//! каждый бандл → результат раздаётся всем future бандла.

pub mod bundler;
pub mod http_publisher;
pub mod message;
pub mod publisher;
pub mod result;
pub mod subscription;
pub mod topic;

pub use bundler::*;
pub use http_publisher::*;
pub use message::*;
pub use publisher::*;
pub use result::*;
pub use subscription::*;
pub use topic::*;
