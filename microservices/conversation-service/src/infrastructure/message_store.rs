//! Message persistence

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_conversation::{ConversationError, Message, Result};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Sequence bounds for a page of messages, both exclusive
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageRange {
    pub after: Option<u64>,
    pub before: Option<u64>,
    pub limit: Option<usize>,
}

impl MessageRange {
    pub fn after(sequence: u64) -> Self {
        Self {
            after: Some(sequence),
            ..Self::default()
        }
    }

    /// Newest `limit` messages strictly before `before`
    pub fn page(before: Option<u64>, limit: usize) -> Self {
        Self {
            after: None,
            before,
            limit: Some(limit),
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn load(&self, message_id: Uuid) -> Result<Message>;

    async fn insert(&self, message: &Message) -> Result<()>;

    /// Replace the stored copy if it is still at `expected_version`
    async fn save(&self, message: &Message, expected_version: u64) -> Result<()>;

    /// Messages in ascending sequence order. With a limit and no lower bound, the
    /// newest messages in range are returned.
    async fn list(&self, conversation_id: Uuid, range: MessageRange) -> Result<Vec<Message>>;
}

/// In-memory message store
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: DashMap<Uuid, Message>,
    // conversation_id -> sequence -> message_id
    timelines: DashMap<Uuid, BTreeMap<u64, Uuid>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn load(&self, message_id: Uuid) -> Result<Message> {
        self.messages
            .get(&message_id)
            .map(|m| m.clone())
            .ok_or(ConversationError::message_not_found(message_id))
    }

    async fn insert(&self, message: &Message) -> Result<()> {
        match self.messages.entry(message.id()) {
            Entry::Occupied(_) => return Err(ConversationError::VersionConflict),
            Entry::Vacant(slot) => {
                slot.insert(message.clone());
            }
        }
        self.timelines
            .entry(message.conversation_id())
            .or_default()
            .insert(message.sequence(), message.id());
        Ok(())
    }

    async fn save(&self, message: &Message, expected_version: u64) -> Result<()> {
        let mut stored = self
            .messages
            .get_mut(&message.id())
            .ok_or(ConversationError::message_not_found(message.id()))?;
        if stored.version() != expected_version {
            return Err(ConversationError::VersionConflict);
        }
        *stored = message.clone();
        Ok(())
    }

    async fn list(&self, conversation_id: Uuid, range: MessageRange) -> Result<Vec<Message>> {
        let ids: Vec<Uuid> = match self.timelines.get(&conversation_id) {
            Some(timeline) => {
                let lower = range.after.map_or(0, |s| s.saturating_add(1));
                let upper = range.before.unwrap_or(u64::MAX);
                if lower >= upper {
                    return Ok(Vec::new());
                }
                let in_range = timeline.range(lower..upper).map(|(_, id)| *id);
                match (range.limit, range.after) {
                    (Some(limit), None) => {
                        let mut newest: Vec<Uuid> = in_range.rev().take(limit).collect();
                        newest.reverse();
                        newest
                    }
                    (Some(limit), Some(_)) => in_range.take(limit).collect(),
                    (None, _) => in_range.collect(),
                }
            }
            None => return Ok(Vec::new()),
        };

        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .collect())
    }
}
