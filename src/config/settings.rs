use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{logging::LoggingConfig, pubsub::PublishSettings, PubSubResult};

/// Префикс переменных окружения: `LEDGER_PUBSUB__PUBLISH__COUNT_THRESHOLD=50`.
pub const ENV_PREFIX: &str = "LEDGER_PUBSUB";
/// Путь к файлу конфигурации по умолчанию.
pub const DEFAULT_CONFIG_FILE: &str = "ledger-pubsub.toml";

/// Настройки узла.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub publish: PublishConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
    /// Топики, создаваемые при старте.
    pub topics: Vec<String>,
}

/// Настройки публикации в сериализуемых единицах.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub delay_threshold_ms: u64,
    pub count_threshold: usize,
    /// `0` означает `25 × num_cpus`.
    pub concurrency_limit: usize,
    pub error_threshold: u64,
    pub buffered_byte_limit: usize,
}

/// Настройки HTTP-клиента доставки.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            publish: PublishConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
            topics: vec!["transactions".to_string(), "gossip".to_string()],
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        let defaults = PublishSettings::default();
        Self {
            delay_threshold_ms: defaults.delay_threshold.as_millis() as u64,
            count_threshold: defaults.count_threshold,
            concurrency_limit: defaults.concurrency_limit,
            error_threshold: defaults.error_threshold,
            buffered_byte_limit: defaults.buffered_byte_limit,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            connect_timeout_ms: 2_000,
        }
    }
}

impl From<&PublishConfig> for PublishSettings {
    fn from(cfg: &PublishConfig) -> Self {
        Self {
            delay_threshold: Duration::from_millis(cfg.delay_threshold_ms),
            count_threshold: cfg.count_threshold,
            concurrency_limit: cfg.concurrency_limit,
            error_threshold: cfg.error_threshold,
            buffered_byte_limit: cfg.buffered_byte_limit,
        }
    }
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем необязательный файл
    /// (`LEDGER_PUBSUB_CONFIG` или `ledger-pubsub.toml`), затем окружение.
    pub fn load() -> PubSubResult<Self> {
        let path = std::env::var(format!("{ENV_PREFIX}_CONFIG"))
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Some(Path::new(&path)))
    }

    pub fn load_from(path: Option<&Path>) -> PubSubResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("topics"),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> PubSubResult<()> {
        if self.publish.count_threshold == 0 {
            return Err(crate::PubSubError::Config(
                "publish.count_threshold must be positive".to_string(),
            ));
        }
        if self.publish.error_threshold == 0 {
            return Err(crate::PubSubError::Config(
                "publish.error_threshold must be positive".to_string(),
            ));
        }
        if self.publish.buffered_byte_limit == 0 {
            return Err(crate::PubSubError::Config(
                "publish.buffered_byte_limit must be positive".to_string(),
            ));
        }
        self.logging.validate().map_err(crate::PubSubError::Config)
    }

    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings::from(&self.publish)
    }
}
