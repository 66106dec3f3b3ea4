//! Conversation error taxonomy

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ConversationError>;

/// Kind of record a lookup failed to find
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Conversation,
    Message,
    Participant,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Message => write!(f, "message"),
            Self::Participant => write!(f, "participant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("{0} not found: {1}")]
    NotFound(Entity, Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Capacity exceeded: at most {limit} participants")]
    CapacityExceeded { limit: u32 },

    #[error("Conversation is no longer active")]
    ConversationInactive,

    #[error("Version conflict: record was modified concurrently")]
    VersionConflict,

    #[error("Message has expired")]
    AlreadyExpired,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl ConversationError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn topology(reason: impl Into<String>) -> Self {
        Self::InvalidTopology(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn not_a_member(user_id: Uuid) -> Self {
        Self::NotFound(Entity::Participant, user_id)
    }

    pub fn conversation_not_found(id: Uuid) -> Self {
        Self::NotFound(Entity::Conversation, id)
    }

    pub fn message_not_found(id: Uuid) -> Self {
        Self::NotFound(Entity::Message, id)
    }

    /// Only lost write races are worth retrying without caller involvement
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict)
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(..) => 404,
            Self::CapacityExceeded { .. } | Self::VersionConflict => 409,
            Self::ConversationInactive | Self::AlreadyExpired => 410,
            Self::InvalidTopology(_) => 422,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(..) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidTopology(_) => "INVALID_TOPOLOGY",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::ConversationInactive => "CONVERSATION_INACTIVE",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::AlreadyExpired => "ALREADY_EXPIRED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}
