//! Send message handler

use chrono::Utc;
use huddle_conversation::{
    ConversationError, Message, MessageDraft, RecordedOutcome, Result, SendOutcome,
};
use huddle_core::{Actor, IdempotencyKey};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::CommandDispatcher;

/// Send message command
pub struct SendMessageCommand {
    pub conversation_id: Uuid,
    pub sender: Actor,
    pub draft: MessageDraft,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Send message result
#[derive(Debug, Clone)]
pub struct SendMessageResult {
    pub message: Message,
    /// The idempotency key had already been used; `message` is the original
    pub replayed: bool,
}

impl CommandDispatcher {
    #[instrument(skip(self, cmd), fields(conversation_id = %cmd.conversation_id, sender = %cmd.sender.user_id))]
    pub async fn send_message(&self, cmd: SendMessageCommand) -> Result<SendMessageResult> {
        let cmd = &cmd;
        let result = self
            .run_command(cmd.conversation_id, "send_message", move || {
                self.try_send_message(cmd)
            })
            .await?;

        if result.replayed {
            self.metrics.idempotent_replays.inc();
        } else {
            self.metrics.messages_sent.inc();
        }
        Ok(result)
    }

    /// Message a user directly, creating the direct conversation if needed
    pub async fn send_direct(
        &self,
        sender: Actor,
        recipient: Uuid,
        draft: MessageDraft,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<SendMessageResult> {
        let conversation = self.open_direct(sender, recipient).await?;
        self.send_message(SendMessageCommand {
            conversation_id: conversation.id(),
            sender,
            draft,
            idempotency_key,
        })
        .await
    }

    /// Copy an existing message into another conversation
    pub async fn forward_message(
        &self,
        actor: Actor,
        message_id: Uuid,
        target_conversation_id: Uuid,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<SendMessageResult> {
        let source = self.messages.load(message_id).await?;
        let origin = self.conversations.load(source.conversation_id()).await?;
        if !origin.can_view(actor.user_id) {
            return Err(ConversationError::message_not_found(message_id));
        }

        let draft = source.forward_draft(Utc::now())?;
        self.send_message(SendMessageCommand {
            conversation_id: target_conversation_id,
            sender: actor,
            draft,
            idempotency_key,
        })
        .await
    }

    async fn try_send_message(&self, cmd: &SendMessageCommand) -> Result<SendMessageResult> {
        let mut conversation = self.conversations.load(cmd.conversation_id).await?;
        let expected = conversation.version();
        let sender = cmd.sender.user_id;

        if let Some(key) = &cmd.idempotency_key {
            if let Some(RecordedOutcome::MessageSent { message_id }) =
                conversation.recorded_outcome(sender, key)
            {
                let message = self.messages.load(*message_id).await?;
                return Ok(SendMessageResult {
                    message,
                    replayed: true,
                });
            }
        }

        let now = Utc::now();
        let mut draft = cmd.draft.clone();
        let mut thread_root = match draft.reply_to {
            Some(parent_id) => {
                let root = self.resolve_thread_root(conversation.id(), parent_id).await?;
                draft = draft.in_thread(root.id());
                Some(root)
            }
            None => None,
        };
        let root_version = thread_root.as_ref().map(Message::version);
        if let Some(root) = thread_root.as_mut() {
            root.attach_reply(now)?;
        }

        let outcome = conversation.send_message(
            sender,
            Uuid::new_v4(),
            draft,
            cmd.idempotency_key.as_ref(),
            now,
        )?;
        let (message, notifications) = match outcome {
            SendOutcome::Created {
                message,
                notifications,
            } => (message, notifications),
            SendOutcome::Replayed { message_id } => {
                let message = self.messages.load(message_id).await?;
                return Ok(SendMessageResult {
                    message,
                    replayed: true,
                });
            }
        };

        // the conversation save is the commit point; later writes are not retried
        self.conversations.save(&conversation, expected).await?;

        if let Err(e) = self.messages.insert(&message).await {
            warn!(message_id = %message.id(), error = %e, "Failed to store committed message");
        }
        if let (Some(root), Some(version)) = (thread_root, root_version) {
            if let Err(e) = self.messages.save(&root, version).await {
                warn!(root_id = %root.id(), error = %e, "Failed to update thread root");
            }
        }

        self.clear_typing(&conversation, sender, now);
        for event in notifications {
            self.events.publish_notification(event);
        }

        info!(
            message_id = %message.id(),
            sequence = message.sequence(),
            "Message sent"
        );
        Ok(SendMessageResult {
            message,
            replayed: false,
        })
    }

    /// A reply to a reply joins the original thread
    async fn resolve_thread_root(&self, conversation_id: Uuid, parent_id: Uuid) -> Result<Message> {
        let parent = self.messages.load(parent_id).await?;
        if parent.conversation_id() != conversation_id || parent.is_deleted() {
            return Err(ConversationError::message_not_found(parent_id));
        }
        let root_id = parent.thread_root_id();
        if root_id == parent.id() {
            Ok(parent)
        } else {
            self.messages.load(root_id).await
        }
    }
}
