use thiserror::Error;

pub type PubSubResult<T> = Result<T, PubSubError>;

/// Ошибки подсистемы pub/sub.
///
/// Тип клонируемый: одна ошибка публикации раздаётся всем ожидающим
/// `PublishResult` одного бандла.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    // ==== Registry ====
    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("subscription already reached the error threshold: {0}")]
    SubscriptionTripped(String),

    // ==== Identity ====
    #[error("unable to decode {field}: {reason}")]
    Encoding { field: &'static str, reason: String },

    // ==== Delivery ====
    #[error("delivery to {endpoint} failed: {reason}")]
    Delivery { endpoint: String, reason: String },

    #[error("message serialization error: {0}")]
    Serialization(String),

    #[error("bundler buffer overflow (limit {limit} bytes)")]
    BundlerOverflow { limit: usize },

    // ==== Futures / lifecycle ====
    #[error("publish result has already been set")]
    ResultAlreadySet,

    #[error("operation exceeded the specified timeout")]
    Timeout,

    #[error("publisher has been dropped")]
    PublisherClosed,

    #[error("no tokio runtime available for the bundler")]
    NoRuntime,

    #[error("configuration error: {0}")]
    Config(String),
}

impl PubSubError {
    /// Ошибка транспорта для конкретного endpoint.
    pub fn delivery(
        endpoint: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Delivery {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// `true` для ошибок, не прерывающих публикацию остальным подписчикам.
    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery { .. })
    }
}

// === Преобразования ===

impl From<serde_json::Error> for PubSubError {
    fn from(err: serde_json::Error) -> Self {
        PubSubError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for PubSubError {
    fn from(err: hex::FromHexError) -> Self {
        PubSubError::Encoding {
            field: "address",
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for PubSubError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        PubSubError::Delivery {
            endpoint,
            reason: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for PubSubError {
    fn from(err: config::ConfigError) -> Self {
        PubSubError::Config(err.to_string())
    }
}
