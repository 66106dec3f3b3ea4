//! Conversation creation

use chrono::Utc;
use huddle_conversation::{
    Conversation, ConversationError, ConversationSettings, GroupSpec, MessageDraft, Result,
};
use huddle_core::Actor;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{CommandDispatcher, SendMessageCommand};

/// Create group command
pub struct CreateGroupCommand {
    pub creator: Actor,
    pub spec: GroupSpec,
    /// Sent by the creator right after the group exists
    pub initial_message: Option<MessageDraft>,
}

impl CommandDispatcher {
    #[instrument(skip(self, cmd), fields(creator = %cmd.creator.user_id))]
    pub async fn create_group(&self, cmd: CreateGroupCommand) -> Result<Conversation> {
        let mut spec = cmd.spec;
        if spec.settings.is_none() {
            spec.settings = Some(ConversationSettings {
                max_participants: self.default_max_participants,
                ..ConversationSettings::default()
            });
        }

        if let Some(draft) = &cmd.initial_message {
            draft.validate()?;
        }

        let conversation = Conversation::group(Uuid::new_v4(), cmd.creator.user_id, spec, Utc::now())?;
        self.conversations.insert(&conversation).await?;
        info!(
            conversation_id = %conversation.id(),
            members = conversation.active_members_count(),
            "Group created"
        );

        let Some(draft) = cmd.initial_message else {
            return Ok(conversation);
        };
        self.send_message(SendMessageCommand {
            conversation_id: conversation.id(),
            sender: cmd.creator,
            draft,
            idempotency_key: None,
        })
        .await?;
        self.conversations.load(conversation.id()).await
    }

    /// Reuse the pair's direct conversation, creating it on first contact
    #[instrument(skip(self, initiator), fields(initiator = %initiator.user_id))]
    pub async fn open_direct(&self, initiator: Actor, peer: Uuid) -> Result<Conversation> {
        if let Some(existing) = self.conversations.find_direct(initiator.user_id, peer).await? {
            return Ok(existing);
        }

        let conversation = Conversation::direct(Uuid::new_v4(), initiator.user_id, peer, Utc::now())?;
        match self.conversations.insert(&conversation).await {
            Ok(()) => {
                info!(conversation_id = %conversation.id(), "Direct conversation created");
                Ok(conversation)
            }
            // another request created the pair first
            Err(ConversationError::VersionConflict) => self
                .conversations
                .find_direct(initiator.user_id, peer)
                .await?
                .ok_or(ConversationError::VersionConflict),
            Err(e) => Err(e),
        }
    }
}
