//! Read and delivery handlers

use chrono::Utc;
use huddle_conversation::receipts;
use huddle_conversation::{ConversationError, MessageStatus, ReadOutcome, ReadTarget, RecordedOutcome, Result};
use huddle_core::{Actor, IdempotencyKey};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::CommandDispatcher;
use crate::infrastructure::message_store::MessageRange;

/// Mark read command
pub struct MarkReadCommand {
    pub conversation_id: Uuid,
    pub reader: Actor,
    pub target: ReadTarget,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl CommandDispatcher {
    #[instrument(skip(self, cmd), fields(conversation_id = %cmd.conversation_id, reader = %cmd.reader.user_id))]
    pub async fn mark_read(&self, cmd: MarkReadCommand) -> Result<ReadOutcome> {
        let cmd = &cmd;
        let (outcome, replayed) = self
            .run_command(cmd.conversation_id, "mark_read", move || self.try_mark_read(cmd))
            .await?;

        if replayed {
            self.metrics.idempotent_replays.inc();
        } else {
            self.metrics.reads_recorded.inc();
        }
        Ok(outcome)
    }

    async fn try_mark_read(&self, cmd: &MarkReadCommand) -> Result<(ReadOutcome, bool)> {
        let mut conversation = self.conversations.load(cmd.conversation_id).await?;
        let expected = conversation.version();
        let reader = cmd.reader.user_id;

        if let Some(key) = &cmd.idempotency_key {
            if let Some(RecordedOutcome::ReadRecorded { outcome }) =
                conversation.recorded_outcome(reader, key)
            {
                return Ok((outcome.clone(), true));
            }
        }
        conversation.ensure_active()?;

        let position = conversation
            .participants()
            .active(reader)
            .ok_or(ConversationError::not_a_member(reader))?
            .last_read()
            .sequence;

        // the window must reach back to the target when it sits below the position
        let floor = match cmd.target {
            ReadTarget::Message(id) | ReadTarget::Through(id) => {
                let target = self.messages.load(id).await?;
                if target.conversation_id() != conversation.id() {
                    return Err(ConversationError::message_not_found(id));
                }
                position.min(target.sequence().saturating_sub(1))
            }
            ReadTarget::All => position,
        };

        let mut window = self
            .messages
            .list(conversation.id(), MessageRange::after(floor))
            .await?;
        let versions: Vec<u64> = window.iter().map(|m| m.version()).collect();

        let commit = conversation.record_read(
            reader,
            &mut window,
            cmd.target,
            cmd.idempotency_key.as_ref(),
            Utc::now(),
        )?;

        // receipts first; replaying them is harmless if the conversation save loses
        for (message, version) in window.iter().zip(versions) {
            if message.version() != version {
                self.messages.save(message, version).await?;
            }
        }
        self.conversations.save(&conversation, expected).await?;

        self.events.publish_realtime(
            commit.event(conversation.id(), reader),
            conversation.participants().active_ids(),
        );
        debug!(
            last_read_sequence = commit.outcome.last_read_sequence,
            unread = commit.outcome.unread_count,
            "Read recorded"
        );
        Ok((commit.outcome, commit.replayed))
    }

    /// Acknowledge delivery of a message to `actor`'s device
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn record_delivery(&self, actor: Actor, message_id: Uuid) -> Result<MessageStatus> {
        let (status, _) = self
            .apply_to_message(message_id, "record_delivery", |conversation, message, now| {
                conversation.ensure_active()?;
                conversation
                    .participants()
                    .active(actor.user_id)
                    .ok_or(ConversationError::not_a_member(actor.user_id))?;
                if message.sender_id() != actor.user_id {
                    receipts::record_delivery(message, now);
                }
                Ok(message.status())
            })
            .await?;
        Ok(status)
    }
}
