//! Channel protocol messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMessageType {
    // Connection
    Auth,
    AuthResult,
    Error,
    Heartbeat,

    // Conversations
    JoinConversation,
    JoinedConversation,
    SendMessage,
    NewMessage,
    MarkMessagesRead,
    MessageRead,
    MessagesReadBulk,
    TypingStart,
    TypingStop,

    // Presence
    RequestOnlineStatuses,
    CurrentOnlineStatuses,
    UserStatusChanged,
    GlobalUserStatusChanged,
}

/// A message sent to/from the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    #[serde(rename = "type")]
    pub msg_type: ChannelMessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl ChannelMessage {
    /// Create a new channel message.
    pub fn new(msg_type: ChannelMessageType) -> Self {
        Self {
            msg_type,
            conversation_id: None,
            payload: None,
            timestamp: Some(Utc::now().to_rfc3339()),
            error: None,
            success: None,
        }
    }

    /// Create an AUTH message. A missing token relies on the backend's
    /// ambient session.
    pub fn auth(token: Option<&str>) -> Self {
        let payload = token.map(|token| serde_json::json!({ "token": token }));
        Self {
            payload,
            ..Self::new(ChannelMessageType::Auth)
        }
    }

    /// Create a JOIN_CONVERSATION message.
    pub fn join_conversation(conversation_id: &str) -> Self {
        Self::new(ChannelMessageType::JoinConversation).with_conversation(conversation_id)
    }

    /// Create a SEND_MESSAGE message.
    pub fn send_message(conversation_id: &str, payload: serde_json::Value) -> Self {
        Self::new(ChannelMessageType::SendMessage)
            .with_conversation(conversation_id)
            .with_payload(payload)
    }

    /// Create a MARK_MESSAGES_READ message.
    pub fn mark_messages_read(conversation_id: &str, message_ids: &[String]) -> Self {
        Self::new(ChannelMessageType::MarkMessagesRead)
            .with_conversation(conversation_id)
            .with_payload(serde_json::json!({ "messageIds": message_ids }))
    }

    /// Create a TYPING_START message.
    pub fn typing_start(conversation_id: &str) -> Self {
        Self::new(ChannelMessageType::TypingStart).with_conversation(conversation_id)
    }

    /// Create a TYPING_STOP message.
    pub fn typing_stop(conversation_id: &str) -> Self {
        Self::new(ChannelMessageType::TypingStop).with_conversation(conversation_id)
    }

    /// Create a REQUEST_ONLINE_STATUSES message (presence bootstrap).
    pub fn request_online_statuses() -> Self {
        Self::new(ChannelMessageType::RequestOnlineStatuses)
    }

    /// Create a HEARTBEAT message.
    pub fn heartbeat() -> Self {
        Self::new(ChannelMessageType::Heartbeat)
    }

    /// Set the conversation ID.
    pub fn with_conversation(mut self, conversation_id: &str) -> Self {
        self.conversation_id = Some(conversation_id.to_string());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse the payload of a USER_STATUS_CHANGED / GLOBAL_USER_STATUS_CHANGED
    /// message. Returns None if this is not a presence delta or the payload
    /// is malformed.
    pub fn presence_delta(&self) -> Option<PresenceDelta> {
        if !matches!(
            self.msg_type,
            ChannelMessageType::UserStatusChanged | ChannelMessageType::GlobalUserStatusChanged
        ) {
            return None;
        }
        let payload = self.payload.as_ref()?;
        let mut delta: PresenceDelta = serde_json::from_value(payload.clone()).ok()?;
        delta.conversation_id = self.conversation_id.clone();
        Some(delta)
    }

    /// Parse the payload of a CURRENT_ONLINE_STATUSES bootstrap snapshot.
    pub fn presence_snapshot(&self) -> Option<PresenceSnapshot> {
        if self.msg_type != ChannelMessageType::CurrentOnlineStatuses {
            return None;
        }
        let payload = self.payload.as_ref()?;
        serde_json::from_value(payload.clone()).ok()
    }
}

/// A single-user presence change pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDelta {
    pub user_id: String,
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Set for conversation-scoped deltas, None for site-wide ones.
    #[serde(skip)]
    pub conversation_id: Option<String>,
}

/// One entry of a presence bootstrap snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// The full online-status snapshot returned for REQUEST_ONLINE_STATUSES.
/// Not assumed exhaustive: users absent here may still receive deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub statuses: Vec<PresenceEntry>,
}
