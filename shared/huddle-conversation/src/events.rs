//! Outbound events, published by the service only after a commit succeeds

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Consumed by the notification collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationEvent {
    #[serde(rename = "message.created")]
    MessageCreated {
        conversation_id: Uuid,
        message_id: Uuid,
        recipient_ids: Vec<Uuid>,
    },
    #[serde(rename = "mention.created")]
    MentionCreated {
        conversation_id: Uuid,
        message_id: Uuid,
        recipient_ids: Vec<Uuid>,
    },
}

impl NotificationEvent {
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::MessageCreated { conversation_id, .. }
            | Self::MentionCreated { conversation_id, .. } => *conversation_id,
        }
    }

    pub fn recipient_ids(&self) -> &[Uuid] {
        match self {
            Self::MessageCreated { recipient_ids, .. }
            | Self::MentionCreated { recipient_ids, .. } => recipient_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPayload {
    pub last_read_message_id: Option<Uuid>,
    pub unread_count: u64,
    pub read_message_ids: Vec<Uuid>,
}

/// Fanned out to connected clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    #[serde(rename = "typing.changed")]
    TypingChanged {
        conversation_id: Uuid,
        user_id: Uuid,
        payload: TypingPayload,
    },
    #[serde(rename = "read.updated")]
    ReadUpdated {
        conversation_id: Uuid,
        user_id: Uuid,
        payload: ReadPayload,
    },
}

impl RealtimeEvent {
    pub fn typing(conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> Self {
        Self::TypingChanged {
            conversation_id,
            user_id,
            payload: TypingPayload { is_typing },
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::TypingChanged { conversation_id, .. }
            | Self::ReadUpdated { conversation_id, .. } => *conversation_id,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            Self::TypingChanged { user_id, .. } | Self::ReadUpdated { user_id, .. } => *user_id,
        }
    }
}
