//! Command handlers
//!
//! Every mutating command runs under its conversation's lock and inside the
//! version-conflict retry loop. Events are published only after the save that
//! commits them.

pub mod administration;
pub mod create_conversation;
pub mod mark_read;
pub mod membership;
pub mod message_lifecycle;
pub mod queries;
pub mod retry;
pub mod send_message;
pub mod typing;

#[cfg(test)]
mod tests;

pub use create_conversation::CreateGroupCommand;
pub use mark_read::MarkReadCommand;
pub use retry::RetryPolicy;
pub use send_message::{SendMessageCommand, SendMessageResult};

use chrono::{DateTime, Utc};
use huddle_conversation::{Conversation, Message, RealtimeEvent, Result, TypingTracker};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::ConversationServiceConfig;
use crate::infrastructure::{
    ConversationLocks, ConversationStore, EventBus, InMemoryDirectory, MessageStore,
};
use crate::metrics::ServiceMetrics;

pub struct CommandDispatcher {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    typing: Arc<TypingTracker>,
    directory: Arc<InMemoryDirectory>,
    events: EventBus,
    locks: ConversationLocks,
    retry: RetryPolicy,
    metrics: Arc<ServiceMetrics>,
    default_max_participants: u32,
}

impl CommandDispatcher {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        directory: Arc<InMemoryDirectory>,
        events: EventBus,
        metrics: Arc<ServiceMetrics>,
        config: &ConversationServiceConfig,
    ) -> Self {
        Self {
            conversations,
            messages,
            typing: Arc::new(TypingTracker::new()),
            directory,
            events,
            locks: ConversationLocks::new(),
            retry: RetryPolicy::new(config.max_command_attempts, config.retry_base_delay),
            metrics,
            default_max_participants: config.default_max_participants,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Serialize on the conversation, retry lost write races, record latency
    async fn run_command<T, F, Fut>(
        &self,
        conversation_id: Uuid,
        command: &'static str,
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let _guard = self.locks.acquire(conversation_id).await;
        let result = self.retry.run(&self.metrics, command, op).await;

        self.metrics
            .command_latency_ms
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &result {
            self.metrics.command_failures.inc();
            debug!(command, %conversation_id, error = %e, "Command rejected");
        }
        result
    }

    /// Load, mutate, save: the shape of every command that touches only the aggregate
    async fn apply<T, F>(
        &self,
        conversation_id: Uuid,
        command: &'static str,
        mutate: F,
    ) -> Result<(T, Conversation)>
    where
        F: Fn(&mut Conversation, DateTime<Utc>) -> Result<T> + Sync,
        T: Send,
    {
        let mutate = &mutate;
        self.run_command(conversation_id, command, move || async move {
            let mut conversation = self.conversations.load(conversation_id).await?;
            let expected = conversation.version();
            let out = mutate(&mut conversation, Utc::now())?;
            self.conversations.save(&conversation, expected).await?;
            Ok((out, conversation))
        })
        .await
    }

    /// Load a message and its conversation, mutate the message, save it if it changed
    async fn apply_to_message<T, F>(
        &self,
        message_id: Uuid,
        command: &'static str,
        mutate: F,
    ) -> Result<(T, Message)>
    where
        F: Fn(&Conversation, &mut Message, DateTime<Utc>) -> Result<T> + Sync,
        T: Send,
    {
        let conversation_id = self.messages.load(message_id).await?.conversation_id();
        let mutate = &mutate;
        self.run_command(conversation_id, command, move || async move {
            let conversation = self.conversations.load(conversation_id).await?;
            let mut message = self.messages.load(message_id).await?;
            let version = message.version();
            let out = mutate(&conversation, &mut message, Utc::now())?;
            if message.version() != version {
                self.messages.save(&message, version).await?;
            }
            Ok((out, message))
        })
        .await
    }

    /// Clear a typing signal and announce it to the members if it was visible
    fn clear_typing(&self, conversation: &Conversation, user_id: Uuid, now: DateTime<Utc>) {
        if self.typing.set_typing(conversation.id(), user_id, false, now) {
            self.events.publish_realtime(
                RealtimeEvent::typing(conversation.id(), user_id, false),
                conversation.participants().active_ids(),
            );
        }
    }
}
