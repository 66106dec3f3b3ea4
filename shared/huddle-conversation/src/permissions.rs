//! Permission resolution
//!
//! Capabilities are a pure function of a participant's role and the conversation
//! settings. Nothing stores them, so they cannot drift from the rule table.

use serde::{Deserialize, Serialize};

/// Default group size limit
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 500;

/// A direct conversation always has exactly this many participants
pub const DIRECT_PARTICIPANTS: u32 = 2;

/// Participant role within one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Moderator,
    Member,
}

impl Role {
    /// Owners and admins form the conversation's admin set
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "moderator" => Some(Self::Moderator),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Conversation-wide settings that feed permission resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// Only admins may send while locked
    pub locked: bool,
    pub private: bool,
    pub allow_invites: bool,
    pub allow_media_sharing: bool,
    pub max_participants: u32,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            locked: false,
            private: false,
            allow_invites: true,
            allow_media_sharing: true,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
        }
    }
}

impl ConversationSettings {
    pub fn direct() -> Self {
        Self {
            private: true,
            allow_invites: false,
            max_participants: DIRECT_PARTICIPANTS,
            ..Self::default()
        }
    }
}

/// Actions a participant may perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_send_messages: bool,
    pub can_send_media: bool,
    pub can_add_members: bool,
    pub can_remove_members: bool,
    pub can_change_info: bool,
    pub can_pin_messages: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        can_send_messages: false,
        can_send_media: false,
        can_add_members: false,
        can_remove_members: false,
        can_change_info: false,
        can_pin_messages: false,
    };

    pub const ALL: Self = Self {
        can_send_messages: true,
        can_send_media: true,
        can_add_members: true,
        can_remove_members: true,
        can_change_info: true,
        can_pin_messages: true,
    };
}

/// Map a role and the conversation settings to a capability set.
///
/// - `owner`/`admin`: everything, regardless of settings.
/// - `moderator`: may add members (while invites are allowed) and pin; sends unless locked.
/// - `member`: sends unless locked; nothing else.
///
/// Media additionally requires `allow_media_sharing` for non-admins.
pub fn resolve(role: Role, settings: &ConversationSettings) -> Capabilities {
    if role.is_admin() {
        return Capabilities::ALL;
    }

    let can_send = !settings.locked;
    let base = Capabilities {
        can_send_messages: can_send,
        can_send_media: can_send && settings.allow_media_sharing,
        ..Capabilities::NONE
    };

    match role {
        Role::Moderator => Capabilities {
            can_add_members: settings.allow_invites,
            can_pin_messages: true,
            ..base
        },
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admins_get_everything_even_when_locked() {
        let locked = ConversationSettings {
            locked: true,
            allow_media_sharing: false,
            allow_invites: false,
            ..ConversationSettings::default()
        };
        assert_eq!(resolve(Role::Owner, &locked), Capabilities::ALL);
        assert_eq!(resolve(Role::Admin, &locked), Capabilities::ALL);
    }

    #[test]
    fn test_moderator_capabilities() {
        let caps = resolve(Role::Moderator, &ConversationSettings::default());
        assert!(caps.can_add_members);
        assert!(caps.can_pin_messages);
        assert!(caps.can_send_messages);
        assert!(!caps.can_remove_members);
        assert!(!caps.can_change_info);
    }

    #[test]
    fn test_member_loses_send_when_locked() {
        let open = resolve(Role::Member, &ConversationSettings::default());
        assert!(open.can_send_messages && open.can_send_media);
        assert!(!open.can_add_members && !open.can_pin_messages);

        let locked = ConversationSettings {
            locked: true,
            ..ConversationSettings::default()
        };
        assert_eq!(resolve(Role::Member, &locked), Capabilities::NONE);
        assert!(!resolve(Role::Moderator, &locked).can_send_messages);
    }

    #[test]
    fn test_media_sharing_toggle() {
        let no_media = ConversationSettings {
            allow_media_sharing: false,
            ..ConversationSettings::default()
        };
        let caps = resolve(Role::Member, &no_media);
        assert!(caps.can_send_messages);
        assert!(!caps.can_send_media);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("moderator"), Some(Role::Moderator));
        assert_eq!(Role::parse("superuser"), None);
    }
}
