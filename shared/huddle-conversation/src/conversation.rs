//! Conversation aggregate
//!
//! Every command goes through [`Conversation::mutate`], which rejects deactivated
//! conversations, applies the change to a scratch copy, and on success stamps
//! `updated_at` and bumps `version`. A failed command leaves the aggregate untouched.

use crate::error::{ConversationError, Result};
use crate::events::{NotificationEvent, ReadPayload, RealtimeEvent};
use crate::idempotency::{IdempotencyLedger, RecordedOutcome};
use crate::message::{Message, MessageDraft};
use crate::participant::{
    AddOutcome, Admission, ConversationKind, JoinMethod, Membership, Participant,
    ParticipantRegistry, ReadPosition,
};
use crate::permissions::{Capabilities, ConversationSettings, Role, DEFAULT_MAX_PARTICIPANTS};
use crate::receipts::{self, ReadOutcome, ReadTarget};
use chrono::{DateTime, Utc};
use huddle_core::{Actor, IdempotencyKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

const DIRECT_FALLBACK_TITLE: &str = "Direct Message";

/// Resolves user ids to human-readable names for title projection
pub trait DisplayNames {
    fn display_name(&self, user_id: Uuid) -> Option<String>;
}

impl DisplayNames for HashMap<Uuid, String> {
    fn display_name(&self, user_id: Uuid) -> Option<String> {
        self.get(&user_id).cloned()
    }
}

/// Conversation lifecycle; deactivation is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deactivated { at: DateTime<Utc>, by: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub preview: String,
    pub sequence: u64,
    pub at: DateTime<Utc>,
}

/// Parameters for creating a group
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupSpec {
    pub title: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
    pub settings: Option<ConversationSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfoUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub locked: Option<bool>,
    pub private: Option<bool>,
    pub allow_invites: Option<bool>,
    pub allow_media_sharing: Option<bool>,
    pub max_participants: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferencesUpdate {
    /// An empty string clears the nickname
    pub nickname: Option<String>,
    pub notifications_enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub enum SendOutcome {
    Created {
        message: Message,
        notifications: Vec<NotificationEvent>,
    },
    /// The token was already used; nothing changed
    Replayed { message_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct ReadCommit {
    pub outcome: ReadOutcome,
    pub replayed: bool,
}

impl ReadCommit {
    pub fn event(&self, conversation_id: Uuid, reader: Uuid) -> RealtimeEvent {
        RealtimeEvent::ReadUpdated {
            conversation_id,
            user_id: reader,
            payload: ReadPayload {
                last_read_message_id: self.outcome.last_read_message_id,
                unread_count: self.outcome.unread_count,
                read_message_ids: self.outcome.receipted_message_ids.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    id: Uuid,
    kind: ConversationKind,
    title: Option<String>,
    description: Option<String>,
    avatar_url: Option<String>,
    created_by: Uuid,
    participants: ParticipantRegistry,
    settings: ConversationSettings,
    messages_count: u64,
    last_message: Option<LastMessage>,
    pinned: Vec<Uuid>,
    lifecycle: Lifecycle,
    encryption_key: Option<String>,
    idempotency: IdempotencyLedger,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Conversation {
    fn empty(
        id: Uuid,
        kind: ConversationKind,
        created_by: Uuid,
        settings: ConversationSettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            title: None,
            description: None,
            avatar_url: None,
            created_by,
            participants: ParticipantRegistry::default(),
            settings,
            messages_count: 0,
            last_message: None,
            pinned: Vec::new(),
            lifecycle: Lifecycle::Active,
            encryption_key: None,
            idempotency: IdempotencyLedger::default(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a direct conversation between `initiator` and `peer`
    pub fn direct(id: Uuid, initiator: Uuid, peer: Uuid, now: DateTime<Utc>) -> Result<Self> {
        if initiator == peer {
            return Err(ConversationError::topology(
                "a direct conversation needs two distinct users",
            ));
        }

        let mut conversation = Self::empty(
            id,
            ConversationKind::Direct,
            initiator,
            ConversationSettings::direct(),
            now,
        );
        for user_id in [initiator, peer] {
            conversation.admit(user_id, Role::Member, JoinMethod::Created, None, now)?;
        }
        Ok(conversation)
    }

    /// Create a group; the creator becomes its first admin
    pub fn group(id: Uuid, creator: Uuid, spec: GroupSpec, now: DateTime<Utc>) -> Result<Self> {
        let title = validate_title(&spec.title)?;
        if let Some(description) = &spec.description {
            validate_description(description)?;
        }

        let mut settings = spec.settings.unwrap_or_default();
        if settings.max_participants == 0 {
            settings.max_participants = DEFAULT_MAX_PARTICIPANTS;
        }

        let mut conversation = Self::empty(id, ConversationKind::Group, creator, settings, now);
        conversation.title = Some(title);
        conversation.description = spec.description;
        conversation.avatar_url = spec.avatar_url;

        conversation.admit(creator, Role::Admin, JoinMethod::Created, None, now)?;
        for user_id in spec.member_ids {
            conversation.admit(user_id, Role::Member, JoinMethod::Invited, Some(creator), now)?;
        }
        Ok(conversation)
    }

    fn admit(
        &mut self,
        user_id: Uuid,
        role: Role,
        join_method: JoinMethod,
        invited_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<AddOutcome> {
        let admission = Admission {
            user_id,
            role,
            join_method,
            invited_by,
            read_from: self.messages_count,
        };
        self.participants.add(admission, self.kind, &self.settings, now)
    }

    /// Single mutation funnel
    fn mutate<T>(
        &mut self,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.ensure_active()?;
        let mut next = self.clone();
        let out = apply(&mut next)?;
        next.updated_at = now;
        next.version += 1;
        *self = next;
        Ok(out)
    }

    pub fn ensure_active(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Active => Ok(()),
            Lifecycle::Deactivated { .. } => Err(ConversationError::ConversationInactive),
        }
    }

    fn require_capability(
        &self,
        user_id: Uuid,
        check: impl FnOnce(&Capabilities) -> bool,
        reason: &str,
    ) -> Result<&Participant> {
        let participant = self.participants.require_active(user_id)?;
        if check(&participant.capabilities(&self.settings)) {
            Ok(participant)
        } else {
            Err(ConversationError::forbidden(reason))
        }
    }

    fn require_group(&self, what: &str) -> Result<()> {
        match self.kind {
            ConversationKind::Group => Ok(()),
            ConversationKind::Direct => Err(ConversationError::topology(format!(
                "{what} only applies to group conversations"
            ))),
        }
    }

    // -- membership --

    /// Add `user_id`; with `invited_by` the inviter must hold `can_add_members`.
    /// Without it this is a self-join, which private groups refuse.
    pub fn add_participant(
        &mut self,
        user_id: Uuid,
        invited_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<AddOutcome> {
        let join_method = if invited_by.is_some() {
            JoinMethod::Invited
        } else {
            JoinMethod::Joined
        };
        self.mutate(now, |c| {
            let self_join = invited_by.is_none() && c.participants.active(user_id).is_none();
            if self_join && c.kind == ConversationKind::Group && c.settings.private {
                return Err(ConversationError::forbidden(
                    "private groups can only be joined by invitation",
                ));
            }
            c.admit(user_id, Role::Member, join_method, invited_by, now)
        })
    }

    /// All-or-nothing batch add
    pub fn add_participants(
        &mut self,
        user_ids: &[Uuid],
        invited_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, AddOutcome)>> {
        self.mutate(now, |c| {
            user_ids
                .iter()
                .map(|user_id| {
                    c.admit(*user_id, Role::Member, JoinMethod::Invited, Some(invited_by), now)
                        .map(|outcome| (*user_id, outcome))
                })
                .collect()
        })
    }

    /// Remove `target` (or self-leave when `actor == target`). A group whose final
    /// member leaves is deactivated.
    pub fn remove_participant(
        &mut self,
        actor: Uuid,
        target: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(now, |c| {
            let remaining = c
                .participants
                .remove(actor, target, c.kind, &c.settings, now)?;
            if remaining == 0 {
                c.lifecycle = Lifecycle::Deactivated { at: now, by: actor };
            }
            Ok(())
        })
    }

    pub fn change_role(
        &mut self,
        actor: Uuid,
        target: Uuid,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.mutate(now, |c| c.participants.change_role(actor, target, role, c.kind))
    }

    pub fn set_muted(
        &mut self,
        actor: Uuid,
        target: Uuid,
        muted: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(now, |c| c.participants.set_muted(actor, target, muted))
    }

    /// Per-participant view flag; never blocks other commands
    pub fn set_archived(&mut self, actor: Uuid, archived: bool, now: DateTime<Utc>) -> Result<()> {
        self.mutate(now, |c| {
            c.participants.active_mut(actor)?.archived = archived;
            Ok(())
        })
    }

    pub fn update_preferences(
        &mut self,
        actor: Uuid,
        update: PreferencesUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(nickname) = &update.nickname {
            if nickname.chars().count() > MAX_TITLE_CHARS {
                return Err(ConversationError::validation(format!(
                    "nickname exceeds {MAX_TITLE_CHARS} characters"
                )));
            }
        }
        self.mutate(now, |c| {
            let participant = c.participants.active_mut(actor)?;
            if let Some(nickname) = update.nickname {
                participant.nickname = Some(nickname).filter(|n| !n.trim().is_empty());
            }
            if let Some(enabled) = update.notifications_enabled {
                participant.notifications_enabled = enabled;
            }
            Ok(())
        })
    }

    // -- info, settings, lifecycle --

    pub fn update_info(&mut self, actor: Uuid, update: InfoUpdate, now: DateTime<Utc>) -> Result<()> {
        self.require_group("conversation info")?;
        let title = update.title.as_deref().map(validate_title).transpose()?;
        if let Some(description) = &update.description {
            validate_description(description)?;
        }

        self.mutate(now, |c| {
            c.require_capability(
                actor,
                |caps| caps.can_change_info,
                "insufficient privilege to change conversation info",
            )?;
            if let Some(title) = title {
                c.title = Some(title);
            }
            if let Some(description) = update.description {
                c.description = Some(description).filter(|d| !d.is_empty());
            }
            if let Some(avatar_url) = update.avatar_url {
                c.avatar_url = Some(avatar_url).filter(|a| !a.is_empty());
            }
            Ok(())
        })
    }

    pub fn update_settings(
        &mut self,
        actor: Uuid,
        update: SettingsUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_group("conversation settings")?;
        self.mutate(now, |c| {
            c.require_capability(
                actor,
                |caps| caps.can_change_info,
                "insufficient privilege to change conversation settings",
            )?;
            if let Some(max) = update.max_participants {
                let active = c.participants.active_count();
                if max == 0 || max < active {
                    return Err(ConversationError::validation(format!(
                        "max_participants must be at least the {active} active members"
                    )));
                }
                c.settings.max_participants = max;
            }
            if let Some(locked) = update.locked {
                c.settings.locked = locked;
            }
            if let Some(private) = update.private {
                c.settings.private = private;
            }
            if let Some(allow_invites) = update.allow_invites {
                c.settings.allow_invites = allow_invites;
            }
            if let Some(allow_media_sharing) = update.allow_media_sharing {
                c.settings.allow_media_sharing = allow_media_sharing;
            }
            Ok(())
        })
    }

    /// Terminal. Requires a conversation owner/admin or platform staff.
    pub fn deactivate(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<()> {
        self.mutate(now, |c| {
            let is_admin = c
                .participants
                .active(actor.user_id)
                .is_some_and(|p| p.role().is_admin());
            if !is_admin && !actor.platform_role.is_staff() {
                return Err(ConversationError::forbidden(
                    "only admins can deactivate a conversation",
                ));
            }
            c.lifecycle = Lifecycle::Deactivated {
                at: now,
                by: actor.user_id,
            };
            Ok(())
        })
    }

    /// Store or clear the opaque key. Either side of a direct conversation may set it;
    /// groups require `can_change_info`.
    pub fn set_encryption_key(
        &mut self,
        actor: Uuid,
        key: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(now, |c| {
            match c.kind {
                ConversationKind::Direct => {
                    c.participants.require_active(actor)?;
                }
                ConversationKind::Group => {
                    c.require_capability(
                        actor,
                        |caps| caps.can_change_info,
                        "insufficient privilege to change the encryption key",
                    )?;
                }
            }
            c.encryption_key = key.filter(|k| !k.is_empty());
            Ok(())
        })
    }

    // -- messages --

    /// Previously recorded outcome for `(actor, key)`, if any
    pub fn recorded_outcome(&self, actor: Uuid, key: &IdempotencyKey) -> Option<&RecordedOutcome> {
        self.idempotency.lookup(actor, key)
    }

    pub fn send_message(
        &mut self,
        sender: Uuid,
        message_id: Uuid,
        draft: MessageDraft,
        idempotency_key: Option<&IdempotencyKey>,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome> {
        if let Some(key) = idempotency_key {
            if let Some(RecordedOutcome::MessageSent { message_id }) =
                self.idempotency.lookup(sender, key)
            {
                return Ok(SendOutcome::Replayed {
                    message_id: *message_id,
                });
            }
        }
        draft.validate()?;

        self.mutate(now, |c| {
            let is_media = draft.content_type.is_media();
            c.require_capability(
                sender,
                |caps| {
                    caps.can_send_messages && (!is_media || caps.can_send_media)
                },
                if is_media {
                    "not allowed to send media in this conversation"
                } else {
                    "not allowed to send messages in this conversation"
                },
            )?;

            let sequence = c.messages_count + 1;
            let message = Message::from_draft(message_id, c.id, sequence, sender, draft, now);

            c.messages_count = sequence;
            c.last_message = Some(LastMessage {
                message_id,
                sender_id: sender,
                preview: message.preview(),
                sequence,
                at: now,
            });
            receipts::increment_unread_for_others(&mut c.participants, &message);

            if let Some(key) = idempotency_key {
                c.idempotency.record(
                    sender,
                    key.clone(),
                    RecordedOutcome::MessageSent { message_id },
                );
            }

            let notifications = c.notifications_for(&message);
            Ok(SendOutcome::Created {
                message,
                notifications,
            })
        })
    }

    fn notifications_for(&self, message: &Message) -> Vec<NotificationEvent> {
        let recipients: Vec<Uuid> = self
            .participants
            .iter_active()
            .map(Participant::user_id)
            .filter(|id| *id != message.sender_id())
            .collect();

        let mut mentioned: Vec<Uuid> = Vec::new();
        for id in message.mentions() {
            if recipients.contains(id) && !mentioned.contains(id) {
                mentioned.push(*id);
            }
        }

        let mut events = vec![NotificationEvent::MessageCreated {
            conversation_id: self.id,
            message_id: message.id(),
            recipient_ids: recipients,
        }];
        if !mentioned.is_empty() {
            events.push(NotificationEvent::MentionCreated {
                conversation_id: self.id,
                message_id: message.id(),
                recipient_ids: mentioned,
            });
        }
        events
    }

    /// Record a read over `window`, which must contain every message after the
    /// reader's current position plus the target.
    pub fn record_read(
        &mut self,
        reader: Uuid,
        window: &mut [Message],
        target: ReadTarget,
        idempotency_key: Option<&IdempotencyKey>,
        now: DateTime<Utc>,
    ) -> Result<ReadCommit> {
        if let Some(key) = idempotency_key {
            if let Some(RecordedOutcome::ReadRecorded { outcome }) =
                self.idempotency.lookup(reader, key)
            {
                return Ok(ReadCommit {
                    outcome: outcome.clone(),
                    replayed: true,
                });
            }
        }
        if let Some(foreign) = window.iter().find(|m| m.conversation_id() != self.id) {
            return Err(ConversationError::message_not_found(foreign.id()));
        }

        self.mutate(now, |c| {
            let latest = c.messages_count;
            let outcome =
                receipts::record_read(&mut c.participants, window, reader, target, latest, now)?;
            if let Some(key) = idempotency_key {
                c.idempotency.record(
                    reader,
                    key.clone(),
                    RecordedOutcome::ReadRecorded {
                        outcome: outcome.clone(),
                    },
                );
            }
            Ok(ReadCommit {
                outcome,
                replayed: false,
            })
        })
    }

    /// Re-check read coverage over `window` after the membership changed. Messages are
    /// separate records, so the aggregate itself is untouched.
    pub fn settle_read_status(&self, window: &mut [Message], now: DateTime<Utc>) -> Vec<Uuid> {
        if !self.is_active() || window.iter().any(|m| m.conversation_id() != self.id) {
            return Vec::new();
        }
        receipts::settle_read_status(&self.participants, window, now)
    }

    pub fn pin_message(&mut self, actor: Uuid, message: &Message, now: DateTime<Utc>) -> Result<bool> {
        if message.conversation_id() != self.id || message.is_deleted() {
            return Err(ConversationError::message_not_found(message.id()));
        }
        self.mutate(now, |c| {
            c.require_capability(
                actor,
                |caps| caps.can_pin_messages,
                "insufficient privilege to pin messages",
            )?;
            if c.pinned.contains(&message.id()) {
                return Ok(false);
            }
            c.pinned.push(message.id());
            Ok(true)
        })
    }

    pub fn unpin_message(&mut self, actor: Uuid, message_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.mutate(now, |c| {
            c.require_capability(
                actor,
                |caps| caps.can_pin_messages,
                "insufficient privilege to unpin messages",
            )?;
            let before = c.pinned.len();
            c.pinned.retain(|id| *id != message_id);
            Ok(c.pinned.len() != before)
        })
    }

    /// Soft delete is open to the sender, conversation owners/admins/moderators and
    /// platform staff
    pub fn authorize_deletion(&self, actor: &Actor, message: &Message) -> Result<()> {
        self.ensure_active()?;
        if message.conversation_id() != self.id {
            return Err(ConversationError::message_not_found(message.id()));
        }
        if actor.user_id == message.sender_id() || actor.platform_role.is_staff() {
            return Ok(());
        }
        let moderates = self
            .participants
            .active(actor.user_id)
            .is_some_and(|p| matches!(p.role(), Role::Owner | Role::Admin | Role::Moderator));
        if moderates {
            Ok(())
        } else {
            Err(ConversationError::forbidden(
                "only the sender or a moderator can delete this message",
            ))
        }
    }

    /// Interaction with existing messages (edits, reactions) requires active membership
    pub fn authorize_interaction(&self, actor: Uuid, message: &Message) -> Result<()> {
        self.ensure_active()?;
        if message.conversation_id() != self.id {
            return Err(ConversationError::message_not_found(message.id()));
        }
        self.participants.require_active(actor).map(|_| ())
    }

    // -- accessors --

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ConversationKind {
        self.kind
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_by(&self) -> Uuid {
        self.created_by
    }

    pub fn participants(&self) -> &ParticipantRegistry {
        &self.participants
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.get(user_id)
    }

    pub fn settings(&self) -> &ConversationSettings {
        &self.settings
    }

    pub fn messages_count(&self) -> u64 {
        self.messages_count
    }

    /// Sequence of the newest message, 0 when empty
    pub fn latest_sequence(&self) -> u64 {
        self.messages_count
    }

    pub fn active_members_count(&self) -> u32 {
        self.participants.active_count()
    }

    /// Empty for direct conversations, whose members are all plain members
    pub fn admin_ids(&self) -> Vec<Uuid> {
        self.participants.admin_ids()
    }

    pub fn last_message(&self) -> Option<&LastMessage> {
        self.last_message.as_ref()
    }

    pub fn pinned_message_ids(&self) -> &[Uuid] {
        &self.pinned
    }

    pub fn has_pinned_messages(&self) -> bool {
        !self.pinned.is_empty()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Active)
    }

    pub fn encryption_key(&self) -> Option<&str> {
        self.encryption_key.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Most recent activity, used to order conversation lists
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map_or(self.created_at, |m| m.at)
    }

    /// Other side of a direct conversation
    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.kind != ConversationKind::Direct {
            return None;
        }
        self.participants
            .iter()
            .map(Participant::user_id)
            .find(|id| *id != user_id)
    }

    /// Deactivated conversations project no capabilities
    pub fn capabilities_of(&self, user_id: Uuid) -> Capabilities {
        match self.participants.get(user_id) {
            Some(p) if self.is_active() => p.capabilities(&self.settings),
            _ => Capabilities::NONE,
        }
    }

    /// Any participant record, including departed ones, may read history
    pub fn can_view(&self, user_id: Uuid) -> bool {
        self.participants.get(user_id).is_some()
    }

    pub fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        self.participants
            .get(user_id)
            .map(Participant::unread_count)
            .ok_or(ConversationError::not_a_member(user_id))
    }

    /// Direct titles are computed relative to the viewer
    pub fn title_for(&self, viewer: Uuid, names: &dyn DisplayNames) -> String {
        match self.kind {
            ConversationKind::Group => self.title.clone().unwrap_or_default(),
            ConversationKind::Direct => self
                .peer_of(viewer)
                .and_then(|peer| names.display_name(peer))
                .unwrap_or_else(|| DIRECT_FALLBACK_TITLE.to_string()),
        }
    }

    /// Keep only typers that are still active participants
    pub fn filter_typers(&self, typers: Vec<Uuid>) -> Vec<Uuid> {
        typers
            .into_iter()
            .filter(|id| self.participants.active(*id).is_some())
            .collect()
    }

    /// Activity summary for anyone who may view the conversation
    pub fn stats_for(&self, viewer: Uuid) -> Result<ConversationStats> {
        let me = self
            .participants
            .get(viewer)
            .ok_or(ConversationError::not_a_member(viewer))?;
        Ok(ConversationStats {
            conversation_id: self.id,
            messages_count: self.messages_count,
            active_members_count: self.active_members_count(),
            total_members_count: self.participants.len() as u32,
            unread_count: me.unread_count(),
            pinned_count: self.pinned.len() as u32,
            last_activity_at: self.last_activity_at(),
        })
    }

    pub fn view_for(
        &self,
        viewer: Uuid,
        names: &dyn DisplayNames,
        typers: Vec<Uuid>,
    ) -> Result<ConversationView> {
        let me = self
            .participants
            .get(viewer)
            .ok_or(ConversationError::not_a_member(viewer))?;

        let participants = self
            .participants
            .iter()
            .map(|p| ParticipantView {
                user_id: p.user_id(),
                role: p.role(),
                membership: p.membership(),
                nickname: p.nickname().map(str::to_string),
                capabilities: self.capabilities_of(p.user_id()),
            })
            .collect();

        let (deactivated_at, deactivated_by) = match self.lifecycle {
            Lifecycle::Active => (None, None),
            Lifecycle::Deactivated { at, by } => (Some(at), Some(by)),
        };

        Ok(ConversationView {
            id: self.id,
            kind: self.kind,
            title: self.title_for(viewer, names),
            description: self.description.clone(),
            avatar_url: self.avatar_url.clone(),
            created_by: self.created_by,
            participants,
            admin_ids: self.admin_ids(),
            settings: self.settings.clone(),
            messages_count: self.messages_count,
            active_members_count: self.active_members_count(),
            last_message: self.last_message.clone(),
            pinned_message_ids: self.pinned.clone(),
            has_pinned_messages: self.has_pinned_messages(),
            is_active: self.is_active(),
            deactivated_at,
            deactivated_by,
            typing_user_ids: self.filter_typers(typers),
            viewer: ViewerState {
                role: me.role(),
                is_member: me.is_active(),
                unread_count: me.unread_count(),
                last_read: me.last_read(),
                is_muted: me.is_muted(),
                is_archived: me.is_archived(),
                notifications_enabled: me.notifications_enabled(),
                capabilities: self.capabilities_of(viewer),
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub user_id: Uuid,
    pub role: Role,
    pub membership: Membership,
    pub nickname: Option<String>,
    pub capabilities: Capabilities,
}

/// The viewer's own per-participant state
#[derive(Debug, Clone, Serialize)]
pub struct ViewerState {
    pub role: Role,
    pub is_member: bool,
    pub unread_count: u64,
    pub last_read: ReadPosition,
    pub is_muted: bool,
    pub is_archived: bool,
    pub notifications_enabled: bool,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub conversation_id: Uuid,
    pub messages_count: u64,
    pub active_members_count: u32,
    /// Includes departed participants
    pub total_members_count: u32,
    pub unread_count: u64,
    pub pinned_count: u32,
    pub last_activity_at: DateTime<Utc>,
}

/// Client projection; never carries the encryption key
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub title: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub created_by: Uuid,
    pub participants: Vec<ParticipantView>,
    pub admin_ids: Vec<Uuid>,
    pub settings: ConversationSettings,
    pub messages_count: u64,
    pub active_members_count: u32,
    pub last_message: Option<LastMessage>,
    pub pinned_message_ids: Vec<Uuid>,
    pub has_pinned_messages: bool,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<Uuid>,
    pub typing_user_ids: Vec<Uuid>,
    pub viewer: ViewerState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

fn validate_title(raw: &str) -> Result<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ConversationError::validation("title is required"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ConversationError::validation(format!(
            "title exceeds {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

fn validate_description(raw: &str) -> Result<()> {
    if raw.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ConversationError::validation(format!(
            "description exceeds {MAX_DESCRIPTION_CHARS} characters"
        )));
    }
    Ok(())
}
