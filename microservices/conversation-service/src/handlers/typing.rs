//! Typing handlers

use chrono::Utc;
use huddle_conversation::{ConversationError, RealtimeEvent, Result};
use huddle_core::Actor;
use tracing::debug;
use uuid::Uuid;

use super::CommandDispatcher;

impl CommandDispatcher {
    /// Returns whether the visible state changed
    pub async fn set_typing(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        is_typing: bool,
    ) -> Result<bool> {
        let conversation = self.conversations.load(conversation_id).await?;
        conversation.ensure_active()?;
        conversation
            .participants()
            .active(actor.user_id)
            .ok_or(ConversationError::not_a_member(actor.user_id))?;

        let changed = self
            .typing
            .set_typing(conversation_id, actor.user_id, is_typing, Utc::now());
        if changed {
            self.events.publish_realtime(
                RealtimeEvent::typing(conversation_id, actor.user_id, is_typing),
                conversation.participants().active_ids(),
            );
        }
        Ok(changed)
    }

    pub async fn active_typers(&self, viewer: Actor, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let conversation = self.conversations.load(conversation_id).await?;
        if !conversation.can_view(viewer.user_id) {
            return Err(ConversationError::not_a_member(viewer.user_id));
        }
        let typers = self.typing.active_typers(conversation_id, Utc::now());
        Ok(conversation.filter_typers(typers))
    }

    /// Drop typing signals past their liveness window
    pub fn sweep_typing(&self) -> usize {
        let swept = self.typing.sweep_expired(Utc::now());
        if swept > 0 {
            self.metrics.typing_swept.add(swept as u64);
            debug!(swept, "Expired typing indicators removed");
        }
        swept
    }
}
