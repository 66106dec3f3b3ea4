//! Message lifecycle
//!
//! Status only moves forward (`sent -> delivered -> read`). Editing, forwarding,
//! threading, reactions and soft deletion are orthogonal to status.

use crate::error::{ConversationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Maximum message body length in characters
pub const MAX_CONTENT_CHARS: usize = 5000;

const PREVIEW_CHARS: usize = 100;

/// Content classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    File,
    Gif,
}

impl ContentType {
    pub fn is_media(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Delivery status, ordered so that `max` never regresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
    Support,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<u32>,
    pub thumbnail_url: Option<String>,
}

impl MediaAttachment {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
            size_bytes: None,
            width: None,
            height: None,
            duration_secs: None,
            thumbnail_url: None,
        }
    }
}

/// Read receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub at: DateTime<Utc>,
    pub by: Uuid,
}

/// Everything a sender supplies; ids, sequence and timestamps are assigned on send
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    #[serde(default)]
    pub mentions: Vec<Uuid>,
    #[serde(default)]
    pub priority: Priority,
    pub reply_to: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) thread_id: Option<Uuid>,
    #[serde(skip)]
    pub(crate) forwarded_from: Option<Uuid>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn media(content_type: ContentType, attachments: Vec<MediaAttachment>) -> Self {
        Self {
            content_type,
            media: attachments,
            ..Self::default()
        }
    }

    pub fn with_mentions(mut self, mentions: Vec<Uuid>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn replying_to(mut self, parent: Uuid) -> Self {
        self.reply_to = Some(parent);
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Attach the reply to a resolved thread root
    pub fn in_thread(mut self, root: Uuid) -> Self {
        self.thread_id = Some(root);
        self
    }

    pub fn thread_id(&self) -> Option<Uuid> {
        self.thread_id
    }

    pub fn forwarded_from(&self) -> Option<Uuid> {
        self.forwarded_from
    }

    pub fn validate(&self) -> Result<()> {
        if self.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ConversationError::validation(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        if self.content_type.is_media() {
            if self.media.is_empty() {
                return Err(ConversationError::validation(
                    "media messages need at least one attachment",
                ));
            }
        } else if self.content.trim().is_empty() {
            return Err(ConversationError::validation("message content is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub(crate) id: Uuid,
    pub(crate) conversation_id: Uuid,
    pub(crate) sequence: u64,
    pub(crate) sender_id: Uuid,
    pub(crate) content: String,
    pub(crate) content_type: ContentType,
    pub(crate) media: Vec<MediaAttachment>,
    pub(crate) mentions: Vec<Uuid>,
    pub(crate) priority: Priority,
    pub(crate) status: MessageStatus,
    pub(crate) delivered_at: Option<DateTime<Utc>>,
    pub(crate) read_at: Option<DateTime<Utc>>,
    pub(crate) receipts: Vec<ReadReceipt>,
    pub(crate) edited_at: Option<DateTime<Utc>>,
    pub(crate) forwarded_from: Option<Uuid>,
    pub(crate) reply_to: Option<Uuid>,
    pub(crate) thread_id: Option<Uuid>,
    pub(crate) is_thread_root: bool,
    pub(crate) thread_count: u64,
    pub(crate) expires_at: Option<DateTime<Utc>>,
    pub(crate) reactions: HashMap<Uuid, ReactionKind>,
    pub(crate) deleted: Option<Deletion>,
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Message {
    pub(crate) fn from_draft(
        id: Uuid,
        conversation_id: Uuid,
        sequence: u64,
        sender_id: Uuid,
        draft: MessageDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sequence,
            sender_id,
            content: draft.content,
            content_type: draft.content_type,
            media: draft.media,
            mentions: draft.mentions,
            priority: draft.priority,
            status: MessageStatus::Sent,
            delivered_at: None,
            read_at: None,
            receipts: Vec::new(),
            edited_at: None,
            forwarded_from: draft.forwarded_from,
            reply_to: draft.reply_to,
            thread_id: draft.thread_id,
            is_thread_root: false,
            thread_count: 0,
            expires_at: draft.expires_at,
            reactions: HashMap::new(),
            deleted: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn sender_id(&self) -> Uuid {
        self.sender_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn mentions(&self) -> &[Uuid] {
        &self.mentions
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn receipts(&self) -> &[ReadReceipt] {
        &self.receipts
    }

    pub fn has_receipt(&self, user_id: Uuid) -> bool {
        self.receipts.iter().any(|r| r.user_id == user_id)
    }

    pub fn edited_at(&self) -> Option<DateTime<Utc>> {
        self.edited_at
    }

    pub fn forwarded_from(&self) -> Option<Uuid> {
        self.forwarded_from
    }

    pub fn reply_to(&self) -> Option<Uuid> {
        self.reply_to
    }

    pub fn thread_id(&self) -> Option<Uuid> {
        self.thread_id
    }

    pub fn is_thread_root(&self) -> bool {
        self.is_thread_root
    }

    pub fn thread_count(&self) -> u64 {
        self.thread_count
    }

    pub fn deleted(&self) -> Option<Deletion> {
        self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Expiry is evaluated lazily; nothing flips a flag when the deadline passes
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Root of the thread a reply to this message belongs to
    pub fn thread_root_id(&self) -> Uuid {
        self.thread_id.unwrap_or(self.id)
    }

    pub(crate) fn advance_status(&mut self, to: MessageStatus, now: DateTime<Utc>) -> bool {
        if to <= self.status {
            return false;
        }
        if self.delivered_at.is_none() {
            self.delivered_at = Some(now);
        }
        if to == MessageStatus::Read {
            self.read_at = Some(now);
        }
        self.status = to;
        self.touch(now);
        true
    }

    /// Upsert `reader`'s receipt; returns true when a new receipt was added
    pub(crate) fn upsert_receipt(&mut self, reader: Uuid, now: DateTime<Utc>) -> bool {
        let added = match self.receipts.iter_mut().find(|r| r.user_id == reader) {
            Some(receipt) => {
                receipt.read_at = now;
                false
            }
            None => {
                self.receipts.push(ReadReceipt {
                    user_id: reader,
                    read_at: now,
                });
                true
            }
        };
        self.touch(now);
        added
    }

    pub fn edit(&mut self, editor: Uuid, content: String, now: DateTime<Utc>) -> Result<()> {
        if editor != self.sender_id {
            return Err(ConversationError::forbidden(
                "only the sender can edit a message",
            ));
        }
        if self.is_deleted() {
            return Err(ConversationError::message_not_found(self.id));
        }
        if self.is_expired(now) {
            return Err(ConversationError::AlreadyExpired);
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ConversationError::validation(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        if !self.content_type.is_media() && content.trim().is_empty() {
            return Err(ConversationError::validation("message content is empty"));
        }

        self.content = content;
        self.edited_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Register a new reply against this thread root
    pub fn attach_reply(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.is_deleted() {
            return Err(ConversationError::message_not_found(self.id));
        }
        if self.is_expired(now) {
            return Err(ConversationError::AlreadyExpired);
        }
        self.is_thread_root = true;
        self.thread_id = Some(self.id);
        self.thread_count += 1;
        self.touch(now);
        Ok(())
    }

    /// Set, replace, or with `None` clear `user_id`'s reaction. Returns whether anything changed.
    pub fn react(
        &mut self,
        user_id: Uuid,
        reaction: Option<ReactionKind>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.is_deleted() {
            return Err(ConversationError::message_not_found(self.id));
        }
        if self.is_expired(now) {
            return Err(ConversationError::AlreadyExpired);
        }

        let changed = match reaction {
            Some(kind) => self.reactions.insert(user_id, kind) != Some(kind),
            None => self.reactions.remove(&user_id).is_some(),
        };
        if changed {
            self.touch(now);
        }
        Ok(changed)
    }

    pub fn reaction_of(&self, user_id: Uuid) -> Option<ReactionKind> {
        self.reactions.get(&user_id).copied()
    }

    pub fn reaction_counts(&self) -> BTreeMap<ReactionKind, u64> {
        let mut counts = BTreeMap::new();
        for kind in self.reactions.values() {
            *counts.entry(*kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns false when the message was already deleted
    pub fn soft_delete(&mut self, by: Uuid, now: DateTime<Utc>) -> bool {
        if self.is_deleted() {
            return false;
        }
        self.deleted = Some(Deletion { at: now, by });
        self.touch(now);
        true
    }

    /// Copy of this message's content for sending elsewhere
    pub fn forward_draft(&self, now: DateTime<Utc>) -> Result<MessageDraft> {
        if self.is_deleted() {
            return Err(ConversationError::message_not_found(self.id));
        }
        if self.is_expired(now) {
            return Err(ConversationError::AlreadyExpired);
        }
        Ok(MessageDraft {
            content: self.content.clone(),
            content_type: self.content_type,
            media: self.media.clone(),
            forwarded_from: Some(self.id),
            ..MessageDraft::default()
        })
    }

    pub fn preview(&self) -> String {
        match self.content_type {
            ContentType::Text => {
                if self.content.chars().count() > PREVIEW_CHARS {
                    let head: String = self.content.chars().take(PREVIEW_CHARS - 3).collect();
                    format!("{head}...")
                } else {
                    self.content.clone()
                }
            }
            ContentType::Image => "📷 Image".to_string(),
            ContentType::Video => "🎥 Video".to_string(),
            ContentType::Gif => "🎬 GIF".to_string(),
            ContentType::File => "📎 File".to_string(),
            ContentType::Audio => "🎵 Audio".to_string(),
        }
    }

    /// Client projection; deleted and expired messages hide their body
    pub fn view(&self, viewer: Uuid, now: DateTime<Utc>) -> MessageView {
        let expired = self.is_expired(now);
        let hidden = expired || self.is_deleted();
        MessageView {
            id: self.id,
            conversation_id: self.conversation_id,
            sequence: self.sequence,
            sender_id: self.sender_id,
            content: if hidden { None } else { Some(self.content.clone()) },
            content_type: self.content_type,
            media: if hidden { Vec::new() } else { self.media.clone() },
            mentions: self.mentions.clone(),
            priority: self.priority,
            status: self.status,
            read_by: self.receipts.clone(),
            is_edited: self.edited_at.is_some(),
            edited_at: self.edited_at,
            is_forwarded: self.forwarded_from.is_some(),
            forwarded_from: self.forwarded_from,
            reply_to: self.reply_to,
            thread_id: self.thread_id,
            is_thread_root: self.is_thread_root,
            thread_count: self.thread_count,
            expires_at: self.expires_at,
            is_expired: expired,
            is_deleted: self.is_deleted(),
            reactions_count: self.reaction_counts(),
            user_reaction: self.reaction_of(viewer),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sequence: u64,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub content_type: ContentType,
    pub media: Vec<MediaAttachment>,
    pub mentions: Vec<Uuid>,
    pub priority: Priority,
    pub status: MessageStatus,
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_forwarded: bool,
    pub forwarded_from: Option<Uuid>,
    pub reply_to: Option<Uuid>,
    pub thread_id: Option<Uuid>,
    pub is_thread_root: bool,
    pub thread_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub is_deleted: bool,
    pub reactions_count: BTreeMap<ReactionKind, u64>,
    pub user_reaction: Option<ReactionKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
