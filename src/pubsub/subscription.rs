use std::collections::HashMap;

use byteorder::{LittleEndian, WriteBytesExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{PubSubError, PubSubResult};

/// Зарегистрированная цель доставки внутри топика.
///
/// Идентичность (`hash`) выводится из адреса владельца, endpoint-а и времени
/// создания. Счётчик ошибок только растёт; по достижении порога топика
/// подписка удаляется (circuit breaker без обратного перехода).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    hash: String,
    /// URL, на который уходит HTTP POST.
    pub endpoint: String,
    /// Заголовки, применяемые к каждому запросу как есть.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Адрес владельца в hex.
    pub address: String,
    /// Время создания, миллисекунды Unix.
    pub created: i64,
    #[serde(rename = "errCount", default)]
    err_count: u64,
}

/// Запрос на регистрацию подписки, приходящий снаружи ядра.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub topic: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub address: String,
}

impl Subscription {
    /// Создаёт подписку с текущим временем и нулевым счётчиком ошибок.
    ///
    /// # Ошибки
    /// - `PubSubError::Encoding { field: "address" }` если адрес не hex
    /// - `PubSubError::Encoding { field: "endpoint" }` если endpoint не
    ///   абсолютный http(s) URL
    pub fn new(
        endpoint: impl Into<String>,
        headers: HashMap<String, String>,
        address: impl Into<String>,
    ) -> PubSubResult<Self> {
        let created = chrono::Utc::now().timestamp_millis();
        Self::with_created(endpoint, headers, address, created)
    }

    /// Как [`new`](Self::new), но с явно заданным временем создания.
    pub fn with_created(
        endpoint: impl Into<String>,
        headers: HashMap<String, String>,
        address: impl Into<String>,
        created: i64,
    ) -> PubSubResult<Self> {
        let mut sub = Self {
            hash: String::new(),
            endpoint: endpoint.into(),
            headers,
            address: address.into(),
            created,
            err_count: 0,
        };
        sub.make_hash()?;
        Ok(sub)
    }

    /// Пересчитывает идентичность подписки по текущим полям.
    pub fn make_hash(&mut self) -> PubSubResult<()> {
        self.hash = compute_hash(&self.address, &self.endpoint, self.created)?;
        Ok(())
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn has_hash(&self) -> bool {
        !self.hash.is_empty()
    }

    pub fn err_count(&self) -> u64 {
        self.err_count
    }

    /// Учитывает неудачную доставку, возвращает новое значение счётчика.
    pub(crate) fn record_failure(&mut self) -> u64 {
        self.err_count = self.err_count.saturating_add(1);
        self.err_count
    }

    /// Сработал ли circuit breaker для данного порога.
    pub fn is_tripped(
        &self,
        error_threshold: u64,
    ) -> bool {
        self.err_count >= error_threshold
    }
}

impl SubscriptionRequest {
    /// Строит подписку из запроса; имя топика остаётся в запросе.
    pub fn to_subscription(&self) -> PubSubResult<Subscription> {
        Subscription::new(self.endpoint.clone(), self.headers.clone(), &self.address)
    }
}

/// Доменная хеш-функция идентичности: SHA-256.
pub fn domain_hash(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Выводит идентичность подписки.
///
/// На вход хеша подаются: байты адреса (hex-декодированные), сырые байты
/// endpoint-а в UTF-8 и `created` как i64 little-endian. Результат:
/// hex-строка в нижнем регистре.
pub fn compute_hash(
    address: &str,
    endpoint: &str,
    created: i64,
) -> PubSubResult<String> {
    let address_bytes = hex::decode(address)?;
    validate_endpoint(endpoint)?;

    let mut buf = Vec::with_capacity(address_bytes.len() + endpoint.len() + 8);
    buf.extend_from_slice(&address_bytes);
    buf.extend_from_slice(endpoint.as_bytes());
    buf.write_i64::<LittleEndian>(created)
        .map_err(|e| PubSubError::Serialization(e.to_string()))?;

    Ok(hex::encode(domain_hash(&buf)))
}

fn validate_endpoint(endpoint: &str) -> PubSubResult<()> {
    let url = Url::parse(endpoint).map_err(|e| PubSubError::Encoding {
        field: "endpoint",
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(PubSubError::Encoding {
            field: "endpoint",
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
