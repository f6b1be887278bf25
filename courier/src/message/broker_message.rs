/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message to send to a queue or topic.
///
/// The body is opaque bytes. Everything else is broker metadata. The message
/// is encoded to JSON by [`Message::encode`]; the body travels base64-encoded
/// inside that document.
///
/// `sequence_number` is assigned by the broker once it accepts the message
/// for scheduled delivery, and is never encoded. Senders return sequence
/// numbers from
/// [`Sender::schedule_messages`](crate::common::Sender::schedule_messages)
/// rather than writing them into the caller's messages.
///
/// # Example
///
/// ```rust,ignore
/// let message = Message::new("order created")
///     .with_message_id("order-42")
///     .with_content_type("text/plain")
///     .with_property("tenant", "acme");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque payload.
    #[serde(with = "body_encoding")]
    pub body: Vec<u8>,

    /// Application-defined identifier, used by the broker for duplicate detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// MIME type of the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Identifier correlating this message with another, e.g. a request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Application-specific label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Session the message belongs to, for session-aware entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Partition key for partitioned entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,

    /// Intended destination, for auto-forwarding scenarios.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Address replies should be sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// How long the message stays valid once enqueued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<Duration>,

    /// Application properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub application_properties: BTreeMap<String, serde_json::Value>,

    /// When the broker should make the message visible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,

    /// Broker-assigned sequence number.
    ///
    /// Filled in only by transports and receivers for messages the broker
    /// holds. Senders never set it and never transmit it: scheduling returns
    /// sequence numbers instead of writing them into the caller's messages.
    #[serde(skip)]
    pub sequence_number: Option<i64>,
}

impl Message {
    /// Creates a message with the given body and no metadata.
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Sets the message id.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the time to live.
    #[must_use]
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Adds an application property.
    #[must_use]
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    /// Serializes the message into the bytes handed to the transport.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if a property value cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses bytes produced by [`Message::encode`].
    ///
    /// # Errors
    ///
    /// Returns the parser error for anything that is not an encoded message.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

mod body_encoding {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_omits_unset_metadata() {
        let encoded = Message::new("hi").encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object["body"], "aGk=");
    }

    #[test]
    fn sequence_number_is_never_encoded() {
        let mut message = Message::new("hi").with_message_id("m-1");
        message.sequence_number = Some(99);
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.message_id.as_deref(), Some("m-1"));
        assert_eq!(decoded.sequence_number, None);
    }

    #[test]
    fn properties_and_schedule_survive_decoding() {
        let when = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut message = Message::new(vec![0_u8, 159, 146, 150])
            .with_property("tenant", "acme")
            .with_property("priority", 3)
            .with_time_to_live(Duration::from_secs(60));
        message.scheduled_enqueue_time = Some(when);

        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn decode_rejects_invalid_body() {
        assert!(Message::decode(br#"{"body":"***"}"#).is_err());
    }
}
