//! Edit, delete and reaction handlers

use huddle_conversation::{Message, ReactionKind, Result};
use huddle_core::Actor;
use tracing::{info, instrument};
use uuid::Uuid;

use super::CommandDispatcher;

impl CommandDispatcher {
    pub async fn edit_message(
        &self,
        actor: Actor,
        message_id: Uuid,
        content: String,
    ) -> Result<Message> {
        self.apply_to_message(message_id, "edit_message", |conversation, message, now| {
            conversation.authorize_interaction(actor.user_id, message)?;
            message.edit(actor.user_id, content.clone(), now)
        })
        .await
        .map(|(_, m)| m)
    }

    /// Soft delete; the record stays so threads and receipts keep their anchor
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn delete_message(&self, actor: Actor, message_id: Uuid) -> Result<Message> {
        let (deleted, message) = self
            .apply_to_message(message_id, "delete_message", |conversation, message, now| {
                conversation.authorize_deletion(&actor, message)?;
                Ok(message.soft_delete(actor.user_id, now))
            })
            .await?;
        if deleted {
            info!(%message_id, "Message deleted");
        }
        Ok(message)
    }

    /// `None` clears the actor's reaction
    pub async fn react_to_message(
        &self,
        actor: Actor,
        message_id: Uuid,
        reaction: Option<ReactionKind>,
    ) -> Result<Message> {
        self.apply_to_message(message_id, "react_to_message", |conversation, message, now| {
            conversation.authorize_interaction(actor.user_id, message)?;
            message.react(actor.user_id, reaction, now)
        })
        .await
        .map(|(_, m)| m)
    }
}
