use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::PubSubResult;

/// Результат успешной доставки одному подписчику.
pub const DELIVERY_OK: &str = "Ok";

/// Неизменяемое сообщение с непрозрачным телом.
///
/// На проводе тело кодируется в base64: `{"body": "aGVsbG8="}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "base64_body")]
    pub body: Bytes,
}

/// Запрос на публикацию: имя топика и упорядоченная пачка сообщений.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub messages: Vec<Message>,
}

/// Ответ `Publisher::publish`: по одному результату на каждого подписчика,
/// которому была предпринята попытка доставки.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub message_results: Vec<String>,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// Размер тела в байтах (учитывается лимитом буфера бандлера).
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl PublishRequest {
    pub fn new(
        topic: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            topic: topic.into(),
            messages,
        }
    }

    /// Сериализует последовательность сообщений в JSON-массив для тела POST.
    pub fn messages_bytes(&self) -> PubSubResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.messages)?)
    }
}

impl PublishResponse {
    pub fn new(message_results: Vec<String>) -> Self {
        Self { message_results }
    }

    pub fn len(&self) -> usize {
        self.message_results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message_results.is_empty()
    }

    /// Все ли попытки доставки завершились успешно.
    pub fn all_ok(&self) -> bool {
        self.message_results.iter().all(|r| r == DELIVERY_OK)
    }

    /// Кол-во неудачных доставок.
    pub fn failures(&self) -> usize {
        self.message_results
            .iter()
            .filter(|r| r.as_str() != DELIVERY_OK)
            .count()
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        body: &Bytes,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
