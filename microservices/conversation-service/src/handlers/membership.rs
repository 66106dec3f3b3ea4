//! Membership handlers

use chrono::Utc;
use huddle_conversation::{AddOutcome, Conversation, PreferencesUpdate, Result, Role};
use huddle_core::Actor;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::CommandDispatcher;
use crate::infrastructure::message_store::MessageRange;

impl CommandDispatcher {
    /// Invite users into a group; nobody is added unless everyone can be
    #[instrument(skip(self, actor, user_ids), fields(inviter = %actor.user_id, count = user_ids.len()))]
    pub async fn add_participants(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        user_ids: Vec<Uuid>,
    ) -> Result<(Vec<(Uuid, AddOutcome)>, Conversation)> {
        let (outcomes, conversation) = self
            .apply(conversation_id, "add_participants", |c, now| {
                c.add_participants(&user_ids, actor.user_id, now)
            })
            .await?;

        let added = outcomes
            .iter()
            .filter(|(_, o)| *o != AddOutcome::AlreadyActive)
            .count();
        info!(%conversation_id, added, "Participants added");
        Ok((outcomes, conversation))
    }

    /// Self-join a group that is not private
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn join(&self, actor: Actor, conversation_id: Uuid) -> Result<(AddOutcome, Conversation)> {
        let (outcome, conversation) = self
            .apply(conversation_id, "join", |c, now| {
                c.add_participant(actor.user_id, None, now)
            })
            .await?;
        if outcome != AddOutcome::AlreadyActive {
            info!(%conversation_id, ?outcome, "Participant joined");
        }
        Ok((outcome, conversation))
    }

    /// Remove `target`; `actor == target` is a leave
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn remove_participant(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        target: Uuid,
    ) -> Result<Conversation> {
        let (_, conversation) = self
            .apply(conversation_id, "remove_participant", |c, now| {
                c.remove_participant(actor.user_id, target, now)
            })
            .await?;

        self.settle_after_departure(conversation_id, target).await;
        self.clear_typing(&conversation, target, Utc::now());
        info!(
            %conversation_id,
            %target,
            remaining = conversation.active_members_count(),
            active = conversation.is_active(),
            "Participant removed"
        );
        Ok(conversation)
    }

    /// Messages that only waited on the departed reader can now reach `read`. The
    /// removal is already committed, so failures here are logged.
    async fn settle_after_departure(&self, conversation_id: Uuid, departed: Uuid) {
        let _guard = self.locks.acquire(conversation_id).await;
        if let Err(e) = self.try_settle(conversation_id, departed).await {
            warn!(%conversation_id, error = %e, "Failed to settle read status");
        }
    }

    async fn try_settle(&self, conversation_id: Uuid, departed: Uuid) -> Result<()> {
        let conversation = self.conversations.load(conversation_id).await?;
        let Some(floor) = conversation
            .participant(departed)
            .filter(|p| !p.is_active())
            .map(|p| p.last_read().sequence.max(p.joined_sequence()))
        else {
            return Ok(());
        };

        let mut window = self
            .messages
            .list(conversation_id, MessageRange::after(floor))
            .await?;
        let versions: Vec<u64> = window.iter().map(|m| m.version()).collect();
        let settled = conversation.settle_read_status(&mut window, Utc::now());
        for (message, version) in window.iter().zip(versions) {
            if message.version() != version {
                self.messages.save(message, version).await?;
            }
        }
        if !settled.is_empty() {
            debug!(%conversation_id, settled = settled.len(), "Read status settled");
        }
        Ok(())
    }

    pub async fn leave(&self, actor: Actor, conversation_id: Uuid) -> Result<Conversation> {
        self.remove_participant(actor, conversation_id, actor.user_id)
            .await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn change_role(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        target: Uuid,
        role: Role,
    ) -> Result<Conversation> {
        let (changed, conversation) = self
            .apply(conversation_id, "change_role", |c, now| {
                c.change_role(actor.user_id, target, role, now)
            })
            .await?;
        if changed {
            info!(%conversation_id, %target, ?role, "Role changed");
        }
        Ok(conversation)
    }

    /// Muting is self-only; a different `target` is rejected
    pub async fn set_muted(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        target: Uuid,
        muted: bool,
    ) -> Result<Conversation> {
        self.apply(conversation_id, "set_muted", |c, now| {
            c.set_muted(actor.user_id, target, muted, now)
        })
        .await
        .map(|(_, c)| c)
    }

    pub async fn set_archived(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        archived: bool,
    ) -> Result<Conversation> {
        self.apply(conversation_id, "set_archived", |c, now| {
            c.set_archived(actor.user_id, archived, now)
        })
        .await
        .map(|(_, c)| c)
    }

    pub async fn update_preferences(
        &self,
        actor: Actor,
        conversation_id: Uuid,
        update: PreferencesUpdate,
    ) -> Result<Conversation> {
        self.apply(conversation_id, "update_preferences", |c, now| {
            c.update_preferences(actor.user_id, update.clone(), now)
        })
        .await
        .map(|(_, c)| c)
    }
}
