//! Typing liveness tracking
//!
//! Entries expire by read-time filtering: `active_typers` ignores anything older than
//! the liveness window, so a client that stops renewing drops out without any timer.
//! `sweep_expired` only reclaims memory.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds a typing signal stays live without renewal
pub const TYPING_LIVENESS_SECS: i64 = 30;

/// Typing indicator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl TypingIndicator {
    pub fn new(conversation_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            user_id,
            started_at: now,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>, liveness: Duration) -> bool {
        now - self.started_at < liveness
    }
}

/// Concurrent, last-writer-wins typing map keyed by (conversation_id, user_id)
pub struct TypingTracker {
    typing: DashMap<(Uuid, Uuid), TypingIndicator>,
    liveness: Duration,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::with_liveness(Duration::seconds(TYPING_LIVENESS_SECS))
    }

    pub fn with_liveness(liveness: Duration) -> Self {
        Self {
            typing: DashMap::new(),
            liveness,
        }
    }

    /// Record or clear a typing signal. Returns true when the visible state flipped;
    /// renewing a live entry refreshes its timestamp but reports no change.
    pub fn set_typing(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let key = (conversation_id, user_id);
        if is_typing {
            let previous = self
                .typing
                .insert(key, TypingIndicator::new(conversation_id, user_id, now));
            !previous.is_some_and(|p| p.is_live(now, self.liveness))
        } else {
            self.typing
                .remove(&key)
                .is_some_and(|(_, p)| p.is_live(now, self.liveness))
        }
    }

    pub fn is_typing(&self, conversation_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.typing
            .get(&(conversation_id, user_id))
            .is_some_and(|p| p.is_live(now, self.liveness))
    }

    /// Users with a live signal in the conversation, oldest first
    pub fn active_typers(&self, conversation_id: Uuid, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut live: Vec<(DateTime<Utc>, Uuid)> = self
            .typing
            .iter()
            .filter(|entry| {
                entry.key().0 == conversation_id && entry.value().is_live(now, self.liveness)
            })
            .map(|entry| (entry.value().started_at, entry.key().1))
            .collect();
        live.sort();
        live.into_iter().map(|(_, user_id)| user_id).collect()
    }

    /// Drop expired entries; returns how many were removed
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.typing.len();
        self.typing
            .retain(|_, indicator| indicator.is_live(now, self.liveness));
        before.saturating_sub(self.typing.len())
    }

    pub fn len(&self) -> usize {
        self.typing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.typing.is_empty()
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}
