//! Core domain types shared across services

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Platform-wide role of an authenticated user, independent of any conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRole {
    #[default]
    User,
    Moderator,
    Admin,
}

impl PlatformRole {
    /// Moderation staff may act on content they do not own
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Moderator | Self::Admin)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "moderator" => Some(Self::Moderator),
            "admin" | "super_admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// A verified caller, as produced by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub platform_role: PlatformRole,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            platform_role: PlatformRole::User,
        }
    }

    pub fn staff(user_id: Uuid, platform_role: PlatformRole) -> Self {
        Self {
            user_id,
            platform_role,
        }
    }
}

/// Client-supplied token making a retried command apply at most once
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
