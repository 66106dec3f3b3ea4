//! Read-side queries

use chrono::Utc;
use huddle_conversation::{
    Conversation, ConversationError, ConversationStats, ConversationView, MessageView, Result,
};
use huddle_core::Actor;
use uuid::Uuid;

use super::CommandDispatcher;
use crate::infrastructure::message_store::MessageRange;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 50;

impl CommandDispatcher {
    pub async fn get_conversation(
        &self,
        viewer: Actor,
        conversation_id: Uuid,
    ) -> Result<ConversationView> {
        let conversation = self.conversations.load(conversation_id).await?;
        let typers = self.typing.active_typers(conversation_id, Utc::now());
        conversation.view_for(viewer.user_id, self.directory.as_ref(), typers)
    }

    /// Project an aggregate a command just returned
    pub fn view_of(&self, viewer: Actor, conversation: &Conversation) -> Result<ConversationView> {
        let typers = self.typing.active_typers(conversation.id(), Utc::now());
        conversation.view_for(viewer.user_id, self.directory.as_ref(), typers)
    }

    pub async fn conversation_stats(
        &self,
        viewer: Actor,
        conversation_id: Uuid,
    ) -> Result<ConversationStats> {
        self.conversations
            .load(conversation_id)
            .await?
            .stats_for(viewer.user_id)
    }

    /// The viewer's conversations, most recent activity first
    pub async fn list_conversations(
        &self,
        viewer: Actor,
        include_archived: bool,
    ) -> Result<Vec<ConversationView>> {
        let mut conversations = self.conversations.list_for_user(viewer.user_id).await?;
        conversations.sort_by_key(|c| std::cmp::Reverse(c.last_activity_at()));

        let now = Utc::now();
        let mut views = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let archived = conversation
                .participant(viewer.user_id)
                .is_some_and(|p| p.is_archived());
            if archived && !include_archived {
                continue;
            }
            let typers = self.typing.active_typers(conversation.id(), now);
            views.push(conversation.view_for(viewer.user_id, self.directory.as_ref(), typers)?);
        }
        Ok(views)
    }

    /// A page of history ending before sequence `before`, oldest first
    pub async fn list_messages(
        &self,
        viewer: Actor,
        conversation_id: Uuid,
        before: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<MessageView>> {
        let conversation = self.conversations.load(conversation_id).await?;
        if !conversation.can_view(viewer.user_id) {
            return Err(ConversationError::not_a_member(viewer.user_id));
        }
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let now = Utc::now();
        Ok(self
            .messages
            .list(conversation_id, MessageRange::page(before, limit))
            .await?
            .iter()
            .map(|m| m.view(viewer.user_id, now))
            .collect())
    }

    pub async fn unread_count(&self, viewer: Actor, conversation_id: Uuid) -> Result<u64> {
        self.conversations
            .load(conversation_id)
            .await?
            .unread_count(viewer.user_id)
    }

    /// Unread across every conversation the viewer is still active in
    pub async fn total_unread(&self, viewer: Actor) -> Result<u64> {
        Ok(self
            .conversations
            .list_for_user(viewer.user_id)
            .await?
            .iter()
            .filter_map(|c| c.participants().active(viewer.user_id))
            .map(|p| p.unread_count())
            .sum())
    }

    /// Whether new messages in the conversation should reach `user_id`
    pub async fn can_receive(&self, user_id: Uuid, conversation_id: Uuid) -> Result<bool> {
        let conversation = self.conversations.load(conversation_id).await?;
        Ok(conversation.is_active()
            && conversation
                .participants()
                .active(user_id)
                .is_some_and(|p| !p.is_muted() && p.notifications_enabled()))
    }
}
