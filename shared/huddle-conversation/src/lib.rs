//! Huddle Conversation SDK
//!
//! Conversation state core: membership, derived permissions, read and delivery
//! tracking, unread counts, typing liveness and the message lifecycle.

pub mod conversation;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod message;
pub mod participant;
pub mod permissions;
pub mod receipts;
pub mod typing;


pub use conversation::{
    Conversation, ConversationStats, ConversationView, DisplayNames, GroupSpec, InfoUpdate,
    LastMessage, Lifecycle, PreferencesUpdate, ReadCommit, SendOutcome, SettingsUpdate,
};
pub use error::{ConversationError, Entity, Result};
pub use events::{NotificationEvent, RealtimeEvent};
pub use idempotency::RecordedOutcome;
pub use message::{
    ContentType, MediaAttachment, Message, MessageDraft, MessageStatus, MessageView, Priority,
    ReactionKind,
};
pub use participant::{AddOutcome, ConversationKind, Membership, Participant, ReadPosition};
pub use permissions::{resolve, Capabilities, ConversationSettings, Role};
pub use receipts::{ReadOutcome, ReadTarget};
pub use typing::TypingTracker;
