//! Conversation administration handlers

use chrono::Utc;
use huddle_conversation::{Conversation, InfoUpdate, Result, SettingsUpdate};
use huddle_core::Actor;
use tracing::{info, instrument};
use uuid::Uuid;

use super::CommandDispatcher;

impl CommandDispatcher {
    pub async fn update_info(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        update: InfoUpdate,
    ) -> Result<Conversation> {
        self.apply(conversation_id, "update_info", |c, now| {
            c.update_info(actor.user_id, update.clone(), now)
        })
        .await
        .map(|(_, c)| c)
    }

    pub async fn update_settings(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        update: SettingsUpdate,
    ) -> Result<Conversation> {
        self.apply(conversation_id, "update_settings", |c, now| {
            c.update_settings(actor.user_id, update.clone(), now)
        })
        .await
        .map(|(_, c)| c)
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id, staff = actor.platform_role.is_staff()))]
    pub async fn deactivate(&self, actor: Actor, conversation_id: Uuid) -> Result<Conversation> {
        let (_, conversation) = self
            .apply(conversation_id, "deactivate", |c, now| c.deactivate(&actor, now))
            .await?;

        // nobody can type in a closed conversation
        let now = Utc::now();
        for typer in self.typing.active_typers(conversation_id, now) {
            self.clear_typing(&conversation, typer, now);
        }
        info!(%conversation_id, "Conversation deactivated");
        Ok(conversation)
    }

    /// The key is opaque here and never leaves through a projection
    pub async fn set_encryption_key(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        key: Option<String>,
    ) -> Result<()> {
        self.apply(conversation_id, "set_encryption_key", |c, now| {
            c.set_encryption_key(actor.user_id, key.clone(), now)
        })
        .await
        .map(|_| ())
    }

    pub async fn pin_message(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<Conversation> {
        let message = self.messages.load(message_id).await?;
        let message = &message;
        self.apply(conversation_id, "pin_message", |c, now| {
            c.pin_message(actor.user_id, message, now)
        })
        .await
        .map(|(_, c)| c)
    }

    pub async fn unpin_message(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<Conversation> {
        self.apply(conversation_id, "unpin_message", |c, now| {
            c.unpin_message(actor.user_id, message_id, now)
        })
        .await
        .map(|(_, c)| c)
    }
}
