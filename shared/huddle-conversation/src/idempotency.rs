//! Replay ledger for client-supplied idempotency tokens
//!
//! The ledger is stored inside the conversation aggregate, so recording a token and
//! applying the counters it protects commit in the same versioned save.

use crate::receipts::ReadOutcome;
use huddle_core::IdempotencyKey;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Oldest tokens are evicted past this many entries
pub const LEDGER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordedOutcome {
    MessageSent { message_id: Uuid },
    ReadRecorded { outcome: ReadOutcome },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerEntry {
    actor: Uuid,
    key: IdempotencyKey,
    outcome: RecordedOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdempotencyLedger {
    entries: VecDeque<LedgerEntry>,
}

impl IdempotencyLedger {
    /// Tokens are scoped per actor
    pub fn lookup(&self, actor: Uuid, key: &IdempotencyKey) -> Option<&RecordedOutcome> {
        self.entries
            .iter()
            .find(|e| e.actor == actor && &e.key == key)
            .map(|e| &e.outcome)
    }

    pub(crate) fn record(&mut self, actor: Uuid, key: IdempotencyKey, outcome: RecordedOutcome) {
        if self.entries.len() >= LEDGER_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LedgerEntry {
            actor,
            key,
            outcome,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
