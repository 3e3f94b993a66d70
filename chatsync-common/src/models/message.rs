use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of the conversation, either still in flight (has a `temp_id`
/// and no `id`) or acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub content: String,
    pub is_user: bool,
    pub status: MessageStatus,
    /// Epoch millis, set once at creation.
    pub client_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<i64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Builds a locally authored message that has not reached the server yet.
    pub fn optimistic(content: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: None,
            temp_id: Some(new_temp_id()),
            content: content.into(),
            is_user: true,
            status: MessageStatus::Sending,
            client_timestamp: now_ms,
            server_timestamp: None,
            retry_count: 0,
            metadata: None,
        }
    }

    /// Builds a confirmed message from a server payload.
    pub fn from_server(server: ServerMessage, now_ms: i64) -> Self {
        Self {
            client_timestamp: server.timestamp.unwrap_or(now_ms),
            id: Some(server.id),
            temp_id: None,
            content: server.content,
            is_user: server.is_user,
            status: MessageStatus::Sent,
            server_timestamp: Some(now_ms),
            retry_count: 0,
            metadata: server.metadata,
        }
    }

    /// The identifier this message occupies in the display order:
    /// the server id once confirmed, the temp id before.
    pub fn identifier(&self) -> Option<&str> {
        self.id.as_deref().or(self.temp_id.as_deref())
    }

    /// Creation time as a UTC timestamp, `None` if out of range.
    pub fn client_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.client_timestamp)
    }
}

fn new_temp_id() -> String {
    format!("temp_{}", Uuid::new_v4())
}

/// Message payload as delivered by the network layer: a send acknowledgement,
/// a pushed message or one entry of a history page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ServerMessage {
    pub fn new(id: impl Into<String>, content: impl Into<String>, is_user: bool) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_user,
            timestamp: None,
            metadata: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }
}
