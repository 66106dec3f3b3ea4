//! Participant records and the registry that owns them
//!
//! Participants are never dropped: leaving flips the membership state to `Left`, and
//! re-adding a departed user reactivates the same record.

use crate::error::{ConversationError, Result};
use crate::message::Message;
use crate::permissions::{resolve, Capabilities, ConversationSettings, Role, DIRECT_PARTICIPANTS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Conversation topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Membership lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Membership {
    Active {
        joined_at: DateTime<Utc>,
    },
    Left {
        joined_at: DateTime<Utc>,
        left_at: DateTime<Utc>,
    },
}

impl Membership {
    pub fn joined_at(&self) -> DateTime<Utc> {
        match *self {
            Self::Active { joined_at } | Self::Left { joined_at, .. } => joined_at,
        }
    }

    pub fn left_at(&self) -> Option<DateTime<Utc>> {
        match *self {
            Self::Active { .. } => None,
            Self::Left { left_at, .. } => Some(left_at),
        }
    }
}

/// How a participant came to be in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMethod {
    Created,
    Invited,
    Joined,
}

/// Where a participant stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadPosition {
    /// Conversation sequence of the last read message, 0 when nothing was read
    pub sequence: u64,
    pub message_id: Option<Uuid>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub(crate) user_id: Uuid,
    pub(crate) role: Role,
    pub(crate) membership: Membership,
    pub(crate) join_method: JoinMethod,
    pub(crate) invited_by: Option<Uuid>,
    /// Conversation sequence at the latest (re)join; earlier messages never wait on this reader
    #[serde(default)]
    pub(crate) joined_sequence: u64,
    pub(crate) last_read: ReadPosition,
    pub(crate) unread_count: u64,
    pub(crate) muted: bool,
    pub(crate) archived: bool,
    pub(crate) nickname: Option<String>,
    pub(crate) notifications_enabled: bool,
}

impl Participant {
    fn new(
        user_id: Uuid,
        role: Role,
        join_method: JoinMethod,
        invited_by: Option<Uuid>,
        read_from: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            role,
            membership: Membership::Active { joined_at: now },
            join_method,
            invited_by,
            joined_sequence: read_from,
            last_read: ReadPosition {
                sequence: read_from,
                ..ReadPosition::default()
            },
            unread_count: 0,
            muted: false,
            archived: false,
            nickname: None,
            notifications_enabled: true,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    pub fn is_active(&self) -> bool {
        matches!(self.membership, Membership::Active { .. })
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.membership.joined_at()
    }

    pub fn left_at(&self) -> Option<DateTime<Utc>> {
        self.membership.left_at()
    }

    pub fn join_method(&self) -> JoinMethod {
        self.join_method
    }

    pub fn invited_by(&self) -> Option<Uuid> {
        self.invited_by
    }

    pub fn joined_sequence(&self) -> u64 {
        self.joined_sequence
    }

    /// Whether `message` was sent while this participant was present
    pub fn awaits(&self, message: &Message) -> bool {
        self.is_active()
            && self.user_id != message.sender_id()
            && self.joined_sequence < message.sequence()
    }

    pub fn last_read(&self) -> ReadPosition {
        self.last_read
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    /// A departed participant can do nothing
    pub fn capabilities(&self, settings: &ConversationSettings) -> Capabilities {
        if self.is_active() {
            resolve(self.role, settings)
        } else {
            Capabilities::NONE
        }
    }
}

/// Result of an add request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    Added,
    Rejoined,
    AlreadyActive,
}

/// Parameters for admitting one user
#[derive(Debug, Clone, Copy)]
pub(crate) struct Admission {
    pub user_id: Uuid,
    pub role: Role,
    pub join_method: JoinMethod,
    pub invited_by: Option<Uuid>,
    /// Current conversation sequence; the newcomer has nothing unread before it
    pub read_from: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantRegistry {
    members: HashMap<Uuid, Participant>,
    order: Vec<Uuid>,
}

impl ParticipantRegistry {
    /// Any record, active or departed
    pub fn get(&self, user_id: Uuid) -> Option<&Participant> {
        self.members.get(&user_id)
    }

    pub fn active(&self, user_id: Uuid) -> Option<&Participant> {
        self.members.get(&user_id).filter(|p| p.is_active())
    }

    pub(crate) fn active_mut(&mut self, user_id: Uuid) -> Result<&mut Participant> {
        self.members
            .get_mut(&user_id)
            .filter(|p| p.is_active())
            .ok_or(ConversationError::not_a_member(user_id))
    }

    pub(crate) fn require_active(&self, user_id: Uuid) -> Result<&Participant> {
        self.active(user_id)
            .ok_or(ConversationError::not_a_member(user_id))
    }

    /// All records in membership order
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.order.iter().filter_map(|id| self.members.get(id))
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &Participant> {
        self.iter().filter(|p| p.is_active())
    }

    pub(crate) fn iter_active_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.members.values_mut().filter(|p| p.is_active())
    }

    pub fn active_count(&self) -> u32 {
        self.iter_active().count() as u32
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.iter_active().map(|p| p.user_id).collect()
    }

    /// Derived admin set, in membership order
    pub fn admin_ids(&self) -> Vec<Uuid> {
        self.iter_active()
            .filter(|p| p.role.is_admin())
            .map(|p| p.user_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn add(
        &mut self,
        admission: Admission,
        kind: ConversationKind,
        settings: &ConversationSettings,
        now: DateTime<Utc>,
    ) -> Result<AddOutcome> {
        if self.active(admission.user_id).is_some() {
            return Ok(AddOutcome::AlreadyActive);
        }

        let active = self.active_count();
        if kind == ConversationKind::Direct && active >= DIRECT_PARTICIPANTS {
            return Err(ConversationError::topology(
                "a direct conversation has exactly two participants",
            ));
        }

        if let Some(inviter) = admission.invited_by {
            let inviter = self
                .active(inviter)
                .ok_or_else(|| ConversationError::forbidden("inviter is not a participant"))?;
            if !inviter.capabilities(settings).can_add_members {
                return Err(ConversationError::forbidden(
                    "insufficient privilege to add members",
                ));
            }
        }

        if active + 1 > settings.max_participants {
            return Err(ConversationError::CapacityExceeded {
                limit: settings.max_participants,
            });
        }

        match self.members.get_mut(&admission.user_id) {
            Some(departed) => {
                departed.role = Role::Member;
                departed.membership = Membership::Active { joined_at: now };
                departed.join_method = admission.join_method;
                departed.invited_by = admission.invited_by;
                departed.joined_sequence = admission.read_from;
                departed.last_read = ReadPosition {
                    sequence: admission.read_from,
                    ..departed.last_read
                };
                departed.unread_count = 0;
                departed.archived = false;
                Ok(AddOutcome::Rejoined)
            }
            None => {
                let participant = Participant::new(
                    admission.user_id,
                    admission.role,
                    admission.join_method,
                    admission.invited_by,
                    admission.read_from,
                    now,
                );
                self.members.insert(admission.user_id, participant);
                self.order.push(admission.user_id);
                Ok(AddOutcome::Added)
            }
        }
    }

    /// Remove `target`, either by an actor holding `can_remove_members` or as a self-leave.
    /// Returns the number of active participants left behind.
    pub(crate) fn remove(
        &mut self,
        actor: Uuid,
        target: Uuid,
        kind: ConversationKind,
        settings: &ConversationSettings,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let target_role = self.require_active(target)?.role;

        if kind == ConversationKind::Direct {
            return Err(ConversationError::topology(
                "participants cannot leave a direct conversation",
            ));
        }

        if actor != target {
            let actor_p = self
                .active(actor)
                .ok_or_else(|| ConversationError::forbidden("actor is not a participant"))?;
            if !actor_p.capabilities(settings).can_remove_members {
                return Err(ConversationError::forbidden(
                    "insufficient privilege to remove members",
                ));
            }
            if target_role == Role::Owner && actor_p.role != Role::Owner {
                return Err(ConversationError::forbidden(
                    "only an owner can remove an owner",
                ));
            }
        }

        if target_role.is_admin() && self.admin_ids().len() == 1 && self.active_count() > 1 {
            return Err(ConversationError::forbidden(
                "the last admin cannot leave while other members remain",
            ));
        }

        let participant = self.active_mut(target)?;
        participant.membership = Membership::Left {
            joined_at: participant.membership.joined_at(),
            left_at: now,
        };

        Ok(self.active_count())
    }

    /// Returns whether the role actually changed
    pub(crate) fn change_role(
        &mut self,
        actor: Uuid,
        target: Uuid,
        role: Role,
        kind: ConversationKind,
    ) -> Result<bool> {
        if kind == ConversationKind::Direct {
            return Err(ConversationError::topology(
                "direct conversations have no roles",
            ));
        }

        let actor_role = self
            .active(actor)
            .ok_or_else(|| ConversationError::forbidden("actor is not a participant"))?
            .role;
        if !actor_role.is_admin() {
            return Err(ConversationError::forbidden(
                "only owners and admins can change roles",
            ));
        }

        let current = self.require_active(target)?.role;
        if (current == Role::Owner || role == Role::Owner) && actor_role != Role::Owner {
            return Err(ConversationError::forbidden(
                "only an owner can grant or revoke ownership",
            ));
        }
        if current.is_admin() && !role.is_admin() && self.admin_ids().len() == 1 {
            return Err(ConversationError::forbidden("cannot demote the last admin"));
        }
        if current == role {
            return Ok(false);
        }

        self.active_mut(target)?.role = role;
        Ok(true)
    }

    pub(crate) fn set_muted(&mut self, actor: Uuid, target: Uuid, muted: bool) -> Result<()> {
        if actor != target {
            return Err(ConversationError::forbidden(
                "participants can only mute a conversation for themselves",
            ));
        }
        self.active_mut(target)?.muted = muted;
        Ok(())
    }
}
