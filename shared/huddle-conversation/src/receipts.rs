//! Read and delivery tracking
//!
//! Unread counts are recomputed exactly whenever a participant reads, so concurrent
//! sends and reads can never leave a counter drifting.

use crate::error::{ConversationError, Result};
use crate::message::{Message, MessageStatus};
use crate::participant::{ParticipantRegistry, ReadPosition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a read covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "message_id", rename_all = "snake_case")]
pub enum ReadTarget {
    /// A single message
    Message(Uuid),
    /// Every message up to and including this one
    Through(Uuid),
    /// Everything currently in the conversation
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOutcome {
    pub last_read_message_id: Option<Uuid>,
    pub last_read_sequence: u64,
    pub unread_count: u64,
    /// Messages that gained a receipt from this read
    pub receipted_message_ids: Vec<Uuid>,
}

/// `sent -> delivered`; no-op for anything further along
pub fn record_delivery(message: &mut Message, now: DateTime<Utc>) -> bool {
    message.advance_status(MessageStatus::Delivered, now)
}

/// Bump unread for every active participant except the sender whose read position
/// is behind `message`. Returns the participants that were incremented.
pub fn increment_unread_for_others(
    registry: &mut ParticipantRegistry,
    message: &Message,
) -> Vec<Uuid> {
    let mut bumped = Vec::new();
    for participant in registry.iter_active_mut() {
        if participant.user_id == message.sender_id {
            continue;
        }
        if participant.last_read.sequence < message.sequence {
            participant.unread_count += 1;
            bumped.push(participant.user_id);
        }
    }
    bumped
}

/// Every active participant who was present when `message` was sent holds a receipt.
/// Members who joined later or have since left are not waited on.
pub fn is_fully_read(registry: &ParticipantRegistry, message: &Message) -> bool {
    registry
        .iter_active()
        .filter(|p| p.awaits(message))
        .all(|p| message.has_receipt(p.user_id()))
}

/// Promote messages whose coverage completed without a new receipt, e.g. after the
/// last missing reader left. Returns the ids that reached `read`.
pub fn settle_read_status(
    registry: &ParticipantRegistry,
    window: &mut [Message],
    now: DateTime<Utc>,
) -> Vec<Uuid> {
    let mut settled = Vec::new();
    for message in window.iter_mut() {
        if message.status == MessageStatus::Read
            || message.receipts.is_empty()
            || !is_fully_read(registry, message)
        {
            continue;
        }
        if message.advance_status(MessageStatus::Read, now) {
            settled.push(message.id);
        }
    }
    settled
}

/// Apply a read by `reader` over `window`.
///
/// `window` must hold every message of the conversation with a sequence above the
/// reader's current read position, plus the target itself.
pub(crate) fn record_read(
    registry: &mut ParticipantRegistry,
    window: &mut [Message],
    reader: Uuid,
    target: ReadTarget,
    latest_sequence: u64,
    now: DateTime<Utc>,
) -> Result<ReadOutcome> {
    let previous = registry.require_active(reader)?.last_read;

    let (target_id, target_sequence) = match target {
        ReadTarget::Message(id) | ReadTarget::Through(id) => {
            let message = window
                .iter()
                .find(|m| m.id == id)
                .ok_or(ConversationError::message_not_found(id))?;
            (Some(id), message.sequence)
        }
        ReadTarget::All => {
            let latest = window.iter().find(|m| m.sequence == latest_sequence);
            (latest.map(|m| m.id), latest_sequence)
        }
    };

    let mut receipted = Vec::new();
    for message in window.iter_mut() {
        let covered = match target {
            ReadTarget::Message(id) => message.id == id,
            ReadTarget::Through(_) | ReadTarget::All => message.sequence <= target_sequence,
        };
        if !covered || message.sender_id == reader {
            continue;
        }
        if message.upsert_receipt(reader, now) {
            receipted.push(message.id);
        }
        let status = if is_fully_read(registry, message) {
            MessageStatus::Read
        } else {
            MessageStatus::Delivered
        };
        message.advance_status(status, now);
    }

    let position = if target_sequence > previous.sequence {
        ReadPosition {
            sequence: target_sequence,
            message_id: target_id,
            read_at: Some(now),
        }
    } else {
        ReadPosition {
            read_at: Some(now),
            ..previous
        }
    };

    let unread = window
        .iter()
        .filter(|m| m.sequence > position.sequence && m.sender_id != reader)
        .count() as u64;
    debug_assert!(
        window
            .iter()
            .filter(|m| m.sequence > previous.sequence.min(position.sequence))
            .count() as u64
            >= latest_sequence.saturating_sub(previous.sequence.min(position.sequence)),
        "read window must cover every message after the read position"
    );

    let participant = registry.active_mut(reader)?;
    participant.last_read = position;
    participant.unread_count = unread;

    Ok(ReadOutcome {
        last_read_message_id: position.message_id,
        last_read_sequence: position.sequence,
        unread_count: unread,
        receipted_message_ids: receipted,
    })
}
