use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// Destination for CHAT and TYPING frames.
pub const PRIVATE_DESTINATION: &str = "/app/chat.private";
/// Destination for READ_RECEIPT frames.
pub const READ_DESTINATION: &str = "/app/chat.read";
/// Per-user queue every inbound frame is delivered on.
pub const USER_QUEUE: &str = "/user/queue/messages";

/// A registered user. The email is the presence key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    pub email: String,
    #[serde(default, alias = "name")]
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// History entries never carry a type, so a missing one means CHAT.
    #[default]
    Chat,
    Typing,
    ReadReceipt,
}

/// One message as delivered by the broker or returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub recipient_id: UserId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, with = "broker_time")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "type")]
    pub kind: MessageType,
    #[serde(default, alias = "read")]
    pub is_read: bool,
}

impl Message {
    pub fn is_chat(&self) -> bool {
        self.kind == MessageType::Chat
    }

    /// True when the message was sent by or to `peer_id`.
    pub fn involves(&self, peer_id: UserId) -> bool {
        self.sender_id == peer_id || self.recipient_id == peer_id
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Client-to-broker frame body. The broker stamps sender and timestamp on delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub recipient_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
}

impl OutboundFrame {
    pub fn chat(recipient_id: UserId, content: impl Into<String>) -> Self {
        Self {
            recipient_id,
            content: Some(content.into()),
            kind: MessageType::Chat,
        }
    }

    pub fn typing(recipient_id: UserId) -> Self {
        Self {
            recipient_id,
            content: None,
            kind: MessageType::Typing,
        }
    }

    /// Tells `peer_id` that the local user has read everything they sent.
    pub fn read_receipt(peer_id: UserId) -> Self {
        Self {
            recipient_id: peer_id,
            content: None,
            kind: MessageType::ReadReceipt,
        }
    }

    pub fn destination(&self) -> &'static str {
        match self.kind {
            MessageType::ReadReceipt => READ_DESTINATION,
            MessageType::Chat | MessageType::Typing => PRIVATE_DESTINATION,
        }
    }
}

/// Parses a broker timestamp. Offset-less values are server-local and read as UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| format!("invalid timestamp `{text}`: {err}"))
}

mod broker_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| super::parse_timestamp(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
