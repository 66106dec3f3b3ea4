//! Conversation persistence
//!
//! Saves are compare-and-swap on the aggregate version, so a writer holding a stale
//! copy gets `VersionConflict` instead of silently overwriting newer state.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_conversation::{Conversation, ConversationError, ConversationKind, Result};
use uuid::Uuid;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Conversation>;

    /// Persist a new conversation; a direct pair that already exists is a conflict
    async fn insert(&self, conversation: &Conversation) -> Result<()>;

    /// Replace the stored copy if it is still at `expected_version`
    async fn save(&self, conversation: &Conversation, expected_version: u64) -> Result<()>;

    async fn find_direct(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>>;

    /// Every conversation the user has a participant record in
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>>;
}

/// Order-independent key for a direct pair
fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn direct_key(conversation: &Conversation) -> Option<(Uuid, Uuid)> {
    if conversation.kind() != ConversationKind::Direct {
        return None;
    }
    let members: Vec<Uuid> = conversation
        .participants()
        .iter()
        .map(|p| p.user_id())
        .collect();
    match members.as_slice() {
        [a, b] => Some(pair_key(*a, *b)),
        _ => None,
    }
}

/// In-memory conversation store
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<Uuid, Conversation>,
    direct_pairs: DashMap<(Uuid, Uuid), Uuid>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn insert_record(&self, conversation: &Conversation) -> Result<()> {
        match self.conversations.entry(conversation.id()) {
            Entry::Occupied(_) => Err(ConversationError::VersionConflict),
            Entry::Vacant(slot) => {
                slot.insert(conversation.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, id: Uuid) -> Result<Conversation> {
        self.conversations
            .get(&id)
            .map(|c| c.clone())
            .ok_or(ConversationError::conversation_not_found(id))
    }

    async fn insert(&self, conversation: &Conversation) -> Result<()> {
        let Some(key) = direct_key(conversation) else {
            return self.insert_record(conversation);
        };
        // the pair slot stays locked until the record is stored, so `find_direct`
        // never sees an index entry without its conversation
        match self.direct_pairs.entry(key) {
            Entry::Occupied(_) => Err(ConversationError::VersionConflict),
            Entry::Vacant(slot) => {
                self.insert_record(conversation)?;
                slot.insert(conversation.id());
                Ok(())
            }
        }
    }

    async fn save(&self, conversation: &Conversation, expected_version: u64) -> Result<()> {
        let id = conversation.id();
        let mut stored = self
            .conversations
            .get_mut(&id)
            .ok_or(ConversationError::conversation_not_found(id))?;
        if stored.version() != expected_version {
            return Err(ConversationError::VersionConflict);
        }
        *stored = conversation.clone();
        Ok(())
    }

    async fn find_direct(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        let Some(id) = self.direct_pairs.get(&pair_key(a, b)).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.conversations.get(&id).map(|c| c.clone()))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let conversations = self
            .conversations
            .iter()
            .filter(|entry| entry.value().can_view(user_id))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(conversations)
    }
}
