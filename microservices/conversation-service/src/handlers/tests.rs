//! Dispatcher tests against the in-memory collaborators

use super::*;
use async_trait::async_trait;
use huddle_conversation::{
    ConversationError, ConversationSettings, GroupSpec, MessageDraft, MessageStatus,
    NotificationEvent, ReadTarget, Role, SettingsUpdate,
};
use huddle_core::{Actor, IdempotencyKey, PlatformRole};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

use crate::infrastructure::{InMemoryConversationStore, InMemoryMessageStore};

fn config() -> ConversationServiceConfig {
    ConversationServiceConfig {
        retry_base_delay: Duration::from_millis(1),
        ..ConversationServiceConfig::default()
    }
}

fn dispatcher_with(conversations: Arc<dyn ConversationStore>) -> CommandDispatcher {
    CommandDispatcher::new(
        conversations,
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(InMemoryDirectory::new()),
        EventBus::new(256),
        Arc::new(ServiceMetrics::new()),
        &config(),
    )
}

fn dispatcher() -> CommandDispatcher {
    dispatcher_with(Arc::new(InMemoryConversationStore::new()))
}

async fn group(dispatcher: &CommandDispatcher, creator: Uuid, members: &[Uuid]) -> Uuid {
    dispatcher
        .create_group(CreateGroupCommand {
            creator: Actor::user(creator),
            spec: GroupSpec {
                title: "Release crew".to_string(),
                member_ids: members.to_vec(),
                ..GroupSpec::default()
            },
            initial_message: None,
        })
        .await
        .unwrap()
        .id()
}

async fn say(dispatcher: &CommandDispatcher, conversation_id: Uuid, sender: Uuid, text: &str) -> Message {
    dispatcher
        .send_message(SendMessageCommand {
            conversation_id,
            sender: Actor::user(sender),
            draft: MessageDraft::text(text),
            idempotency_key: None,
        })
        .await
        .unwrap()
        .message
}

async fn read_through(
    dispatcher: &CommandDispatcher,
    conversation_id: Uuid,
    reader: Uuid,
    message_id: Uuid,
) -> huddle_conversation::ReadOutcome {
    dispatcher
        .mark_read(MarkReadCommand {
            conversation_id,
            reader: Actor::user(reader),
            target: ReadTarget::Through(message_id),
            idempotency_key: None,
        })
        .await
        .unwrap()
}

/// Fails the first `failures` saves with a version conflict
struct FlakyStore {
    inner: InMemoryConversationStore,
    failures: AtomicU32,
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn load(&self, id: Uuid) -> Result<Conversation> {
        self.inner.load(id).await
    }

    async fn insert(&self, conversation: &Conversation) -> Result<()> {
        self.inner.insert(conversation).await
    }

    async fn save(&self, conversation: &Conversation, expected_version: u64) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ConversationError::VersionConflict);
        }
        self.inner.save(conversation, expected_version).await
    }

    async fn find_direct(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        self.inner.find_direct(a, b).await
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.inner.list_for_user(user_id).await
    }
}

mod flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_then_read_clears_unread() {
        let d = dispatcher();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob, carol]).await;

        let first = say(&d, conv, alice, "standup in 5").await;
        let second = say(&d, conv, alice, "moved to room 2").await;
        assert_eq!(second.sequence(), 2);
        assert_eq!(d.unread_count(Actor::user(bob), conv).await.unwrap(), 2);

        let outcome = read_through(&d, conv, bob, second.id()).await;
        assert_eq!(outcome.unread_count, 0);
        assert_eq!(outcome.last_read_sequence, 2);
        assert_eq!(outcome.receipted_message_ids, vec![first.id(), second.id()]);

        // carol has not read yet, so the group status stops at delivered
        let page = d
            .list_messages(Actor::user(alice), conv, None, None)
            .await
            .unwrap();
        assert!(page.iter().all(|m| m.status == MessageStatus::Delivered));

        read_through(&d, conv, carol, second.id()).await;
        let page = d
            .list_messages(Actor::user(alice), conv, None, None)
            .await
            .unwrap();
        assert!(page.iter().all(|m| m.status == MessageStatus::Read));
        assert_eq!(d.metrics().reads_recorded.get(), 2);
    }

    #[tokio::test]
    async fn test_read_status_follows_membership_changes() {
        let d = dispatcher();
        let (alice, bob, carol, dave) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob, carol]).await;

        let early = say(&d, conv, alice, "agenda is up").await;
        d.add_participants(Actor::user(alice), conv, vec![dave])
            .await
            .unwrap();
        read_through(&d, conv, bob, early.id()).await;

        // carol still owes a receipt; dave joined afterwards and does not
        let page = d.list_messages(Actor::user(alice), conv, None, None).await.unwrap();
        assert_eq!(page[0].status, MessageStatus::Delivered);

        d.leave(Actor::user(carol), conv).await.unwrap();
        let page = d.list_messages(Actor::user(alice), conv, None, None).await.unwrap();
        assert_eq!(page[0].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn test_group_opens_with_initial_message() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut notifications = d.events().subscribe_notifications();

        let conversation = d
            .create_group(CreateGroupCommand {
                creator: Actor::user(alice),
                spec: GroupSpec {
                    title: "Offsite".to_string(),
                    member_ids: vec![bob],
                    ..GroupSpec::default()
                },
                initial_message: Some(MessageDraft::text("welcome aboard")),
            })
            .await
            .unwrap();

        assert_eq!(conversation.messages_count(), 1);
        assert_eq!(conversation.unread_count(bob).unwrap(), 1);
        assert_eq!(
            conversation.last_message().map(|m| m.preview.as_str()),
            Some("welcome aboard")
        );
        let event = notifications.try_recv().unwrap();
        assert!(matches!(event, NotificationEvent::MessageCreated { .. }));
        assert_eq!(event.recipient_ids(), &[bob][..]);

        // an invalid opener creates nothing
        let err = d
            .create_group(CreateGroupCommand {
                creator: Actor::user(alice),
                spec: GroupSpec {
                    title: "Empty opener".to_string(),
                    ..GroupSpec::default()
                },
                initial_message: Some(MessageDraft::text("")),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Validation(_)));
        assert_eq!(d.list_conversations(Actor::user(alice), true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conversation_stats() {
        let d = dispatcher();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob, carol]).await;
        let first = say(&d, conv, alice, "one").await;
        say(&d, conv, alice, "two").await;
        d.pin_message(Actor::user(alice), conv, first.id()).await.unwrap();
        d.leave(Actor::user(carol), conv).await.unwrap();

        let stats = d.conversation_stats(Actor::user(bob), conv).await.unwrap();
        assert_eq!(stats.messages_count, 2);
        assert_eq!(stats.active_members_count, 2);
        assert_eq!(stats.total_members_count, 3);
        assert_eq!(stats.unread_count, 2);
        assert_eq!(stats.pinned_count, 1);

        let err = d
            .conversation_stats(Actor::user(Uuid::new_v4()), conv)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::NotFound(..)));
    }

    #[tokio::test]
    async fn test_reading_an_older_message_keeps_position() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;

        let first = say(&d, conv, alice, "one").await;
        let second = say(&d, conv, alice, "two").await;
        read_through(&d, conv, bob, second.id()).await;

        let outcome = d
            .mark_read(MarkReadCommand {
                conversation_id: conv,
                reader: Actor::user(bob),
                target: ReadTarget::Message(first.id()),
                idempotency_key: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.last_read_sequence, 2);
        assert_eq!(outcome.unread_count, 0);
    }

    #[tokio::test]
    async fn test_direct_conversation_is_created_once() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let first = d
            .send_direct(Actor::user(alice), bob, MessageDraft::text("hey"), None)
            .await
            .unwrap();
        let reply = d
            .send_direct(Actor::user(bob), alice, MessageDraft::text("hi"), None)
            .await
            .unwrap();
        assert_eq!(
            first.message.conversation_id(),
            reply.message.conversation_id()
        );
        assert_eq!(reply.message.sequence(), 2);

        let opened = d.open_direct(Actor::user(alice), bob).await.unwrap();
        assert_eq!(opened.id(), first.message.conversation_id());
        assert_eq!(opened.messages_count(), 2);
    }

    #[tokio::test]
    async fn test_reply_to_reply_joins_root_thread() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;

        let root = say(&d, conv, alice, "who owns the deploy?").await;
        let reply = d
            .send_message(SendMessageCommand {
                conversation_id: conv,
                sender: Actor::user(bob),
                draft: MessageDraft::text("me").replying_to(root.id()),
                idempotency_key: None,
            })
            .await
            .unwrap()
            .message;
        let nested = d
            .send_message(SendMessageCommand {
                conversation_id: conv,
                sender: Actor::user(alice),
                draft: MessageDraft::text("thanks").replying_to(reply.id()),
                idempotency_key: None,
            })
            .await
            .unwrap()
            .message;

        assert_eq!(reply.thread_id(), Some(root.id()));
        assert_eq!(nested.thread_id(), Some(root.id()));
        let root = d.messages.load(root.id()).await.unwrap();
        assert!(root.is_thread_root());
        assert_eq!(root.thread_count(), 2);
    }

    #[tokio::test]
    async fn test_deleted_root_rejects_replies() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;

        let root = say(&d, conv, bob, "oops").await;
        d.delete_message(Actor::user(alice), root.id()).await.unwrap();

        let err = d
            .send_message(SendMessageCommand {
                conversation_id: conv,
                sender: Actor::user(bob),
                draft: MessageDraft::text("reply").replying_to(root.id()),
                idempotency_key: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ConversationError::message_not_found(root.id()));
        let conversation = d.conversations.load(conv).await.unwrap();
        assert_eq!(conversation.messages_count(), 1);
    }

    #[tokio::test]
    async fn test_message_lifecycle_permissions() {
        let d = dispatcher();
        let (alice, bob, mallory) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob, mallory]).await;
        let message = say(&d, conv, bob, "draft notes").await;

        let err = d
            .edit_message(Actor::user(mallory), message.id(), "vandalised".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden(_)));

        let edited = d
            .edit_message(Actor::user(bob), message.id(), "final notes".to_string())
            .await
            .unwrap();
        assert_eq!(edited.content(), "final notes");
        assert!(edited.edited_at().is_some());

        let err = d.delete_message(Actor::user(mallory), message.id()).await.unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden(_)));

        let staff = Actor::staff(Uuid::new_v4(), PlatformRole::Moderator);
        let deleted = d.delete_message(staff, message.id()).await.unwrap();
        assert!(deleted.is_deleted());

        let err = d
            .react_to_message(Actor::user(alice), message.id(), Some(huddle_conversation::ReactionKind::Like))
            .await
            .unwrap_err();
        assert_eq!(err, ConversationError::message_not_found(message.id()));
    }

    #[tokio::test]
    async fn test_forward_copies_into_target() {
        let d = dispatcher();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let source = group(&d, alice, &[bob]).await;
        let target = group(&d, bob, &[carol]).await;
        let original = say(&d, source, alice, "ship it").await;

        let forwarded = d
            .forward_message(Actor::user(bob), original.id(), target, None)
            .await
            .unwrap()
            .message;
        assert_eq!(forwarded.conversation_id(), target);
        assert_eq!(forwarded.forwarded_from(), Some(original.id()));
        assert_eq!(forwarded.content(), "ship it");

        // carol never saw the source conversation
        let err = d
            .forward_message(Actor::user(carol), original.id(), target, None)
            .await
            .unwrap_err();
        assert_eq!(err, ConversationError::message_not_found(original.id()));
    }

    #[tokio::test]
    async fn test_delivery_advances_sent_messages_only() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;
        let message = say(&d, conv, alice, "ping").await;

        assert_eq!(
            d.record_delivery(Actor::user(alice), message.id()).await.unwrap(),
            MessageStatus::Sent
        );
        assert_eq!(
            d.record_delivery(Actor::user(bob), message.id()).await.unwrap(),
            MessageStatus::Delivered
        );
        let err = d
            .record_delivery(Actor::user(Uuid::new_v4()), message.id())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::NotFound(..)));
    }

    #[tokio::test]
    async fn test_membership_and_archive_views() {
        let d = dispatcher();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;
        let other = group(&d, bob, &[]).await;

        let (outcomes, conversation) = d
            .add_participants(Actor::user(alice), conv, vec![carol])
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(conversation.active_members_count(), 3);

        d.change_role(Actor::user(alice), conv, bob, Role::Moderator)
            .await
            .unwrap();
        d.set_archived(Actor::user(bob), other, true).await.unwrap();

        let visible = d.list_conversations(Actor::user(bob), false).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].viewer.role, Role::Moderator);
        let all = d.list_conversations(Actor::user(bob), true).await.unwrap();
        assert_eq!(all.len(), 2);

        let conversation = d.leave(Actor::user(carol), conv).await.unwrap();
        assert_eq!(conversation.active_members_count(), 2);
        // departed members keep read access to history
        assert!(d.get_conversation(Actor::user(carol), conv).await.is_ok());
        assert!(!d.can_receive(carol, conv).await.unwrap());
    }

    #[tokio::test]
    async fn test_muting_others_is_forbidden() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;

        let err = d.set_muted(Actor::user(alice), conv, bob, true).await.unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden(_)));

        d.set_muted(Actor::user(bob), conv, bob, true).await.unwrap();
        assert!(!d.can_receive(bob, conv).await.unwrap());
    }

    #[tokio::test]
    async fn test_deactivated_conversation_rejects_commands() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;
        say(&d, conv, bob, "bye").await;

        let err = d.deactivate(Actor::user(bob), conv).await.unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden(_)));
        d.deactivate(Actor::user(alice), conv).await.unwrap();

        let err = d
            .send_message(SendMessageCommand {
                conversation_id: conv,
                sender: Actor::user(alice),
                draft: MessageDraft::text("anyone?"),
                idempotency_key: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ConversationError::ConversationInactive);

        let history = d.list_messages(Actor::user(bob), conv, None, None).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_self_join_respects_privacy() {
        let d = dispatcher();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;

        let (outcome, conversation) = d.join(Actor::user(carol), conv).await.unwrap();
        assert_eq!(outcome, huddle_conversation::AddOutcome::Added);
        assert!(conversation.participants().active(carol).is_some());

        d.update_settings(
            Actor::user(alice),
            conv,
            SettingsUpdate {
                private: Some(true),
                ..SettingsUpdate::default()
            },
        )
        .await
        .unwrap();
        let dave = Uuid::new_v4();
        let err = d.join(Actor::user(dave), conv).await.unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden(_)));

        // invitations still work
        d.add_participants(Actor::user(alice), conv, vec![dave]).await.unwrap();
    }

    #[tokio::test]
    async fn test_encryption_key_is_admin_only_in_groups() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;

        let err = d
            .set_encryption_key(Actor::user(bob), conv, Some("k1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden(_)));

        d.set_encryption_key(Actor::user(alice), conv, Some("k1".to_string()))
            .await
            .unwrap();
        let stored = d.conversations.load(conv).await.unwrap();
        assert_eq!(stored.encryption_key(), Some("k1"));

        d.set_encryption_key(Actor::user(alice), conv, None).await.unwrap();
        let stored = d.conversations.load(conv).await.unwrap();
        assert_eq!(stored.encryption_key(), None);
    }

    #[tokio::test]
    async fn test_settings_and_pins() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;
        let message = say(&d, conv, bob, "pin me").await;

        let err = d.pin_message(Actor::user(bob), conv, message.id()).await.unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden(_)));
        let conversation = d.pin_message(Actor::user(alice), conv, message.id()).await.unwrap();
        assert!(conversation.has_pinned_messages());
        let conversation = d.unpin_message(Actor::user(alice), conv, message.id()).await.unwrap();
        assert!(!conversation.has_pinned_messages());

        let conversation = d
            .update_settings(
                Actor::user(alice),
                conv,
                SettingsUpdate {
                    locked: Some(true),
                    ..SettingsUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(conversation.settings().locked);
        assert!(!conversation.capabilities_of(bob).can_send_messages);
    }

    #[tokio::test]
    async fn test_message_page_is_clamped() {
        let d = dispatcher();
        let alice = Uuid::new_v4();
        let conv = group(&d, alice, &[]).await;
        for i in 0..60 {
            say(&d, conv, alice, &format!("note {i}")).await;
        }

        let page = d
            .list_messages(Actor::user(alice), conv, None, Some(500))
            .await
            .unwrap();
        assert_eq!(page.len(), 50);
        assert_eq!(page.last().map(|m| m.sequence), Some(60));

        let older = d
            .list_messages(Actor::user(alice), conv, Some(11), Some(0))
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].sequence, 10);

        let err = d
            .list_messages(Actor::user(Uuid::new_v4()), conv, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::NotFound(..)));
    }
}

mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_senders_keep_counters_exact() {
        let d = Arc::new(dispatcher());
        let senders: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let observer = Uuid::new_v4();
        let mut members = senders[1..].to_vec();
        members.push(observer);
        let conv = group(&d, senders[0], &members).await;

        let mut tasks = Vec::new();
        for sender in senders.clone() {
            let d = d.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    say(&d, conv, sender, &format!("{sender} #{i}")).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let conversation = d.conversations.load(conv).await.unwrap();
        assert_eq!(conversation.messages_count(), 40);
        assert_eq!(conversation.unread_count(observer).unwrap(), 40);
        for sender in &senders {
            assert_eq!(conversation.unread_count(*sender).unwrap(), 30);
        }

        let page = d.list_messages(Actor::user(observer), conv, None, Some(50)).await.unwrap();
        let sequences: Vec<u64> = page.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, (1..=40).collect::<Vec<u64>>());
        assert_eq!(d.metrics().messages_sent.get(), 40);
    }

    #[tokio::test]
    async fn test_concurrent_reads_and_sends_converge() {
        let d = Arc::new(dispatcher());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;

        let writer = {
            let d = d.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    say(&d, conv, alice, &format!("update {i}")).await;
                }
            })
        };
        let reader = {
            let d = d.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    d.mark_read(MarkReadCommand {
                        conversation_id: conv,
                        reader: Actor::user(bob),
                        target: ReadTarget::All,
                        idempotency_key: None,
                    })
                    .await
                    .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        writer.await.unwrap();
        reader.await.unwrap();

        let outcome = d
            .mark_read(MarkReadCommand {
                conversation_id: conv,
                reader: Actor::user(bob),
                target: ReadTarget::All,
                idempotency_key: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.last_read_sequence, 20);
        assert_eq!(outcome.unread_count, 0);
        let conversation = d.conversations.load(conv).await.unwrap();
        assert_eq!(conversation.unread_count(bob).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_version_conflict_is_retried_transparently() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryConversationStore::new(),
            failures: AtomicU32::new(0),
        });
        let d = dispatcher_with(store.clone());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;

        store.failures.store(1, Ordering::SeqCst);
        let sent = say(&d, conv, alice, "eventually").await;
        assert_eq!(sent.sequence(), 1);
        assert_eq!(d.metrics().conflict_retries.get(), 1);

        let conversation = d.conversations.load(conv).await.unwrap();
        assert_eq!(conversation.messages_count(), 1);
        assert_eq!(conversation.unread_count(bob).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces_after_attempts() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryConversationStore::new(),
            failures: AtomicU32::new(0),
        });
        let d = dispatcher_with(store.clone());
        let alice = Uuid::new_v4();
        let conv = group(&d, alice, &[]).await;
        let mut notifications = d.events().subscribe_notifications();

        store.failures.store(10, Ordering::SeqCst);
        let err = d
            .send_message(SendMessageCommand {
                conversation_id: conv,
                sender: Actor::user(alice),
                draft: MessageDraft::text("lost"),
                idempotency_key: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ConversationError::VersionConflict);
        assert_eq!(d.metrics().conflict_retries.get(), 2);
        assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
    }
}

mod idempotency_tests {
    use super::*;

    #[tokio::test]
    async fn test_replayed_send_returns_original() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;
        let key = IdempotencyKey::new("send-1");

        let command = || SendMessageCommand {
            conversation_id: conv,
            sender: Actor::user(alice),
            draft: MessageDraft::text("only once"),
            idempotency_key: Some(key.clone()),
        };
        let first = d.send_message(command()).await.unwrap();
        let second = d.send_message(command()).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.message.id(), second.message.id());
        let conversation = d.conversations.load(conv).await.unwrap();
        assert_eq!(conversation.messages_count(), 1);
        assert_eq!(conversation.unread_count(bob).unwrap(), 1);
        assert_eq!(d.metrics().idempotent_replays.get(), 1);
    }

    #[tokio::test]
    async fn test_replayed_read_returns_original_outcome() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;
        let first = say(&d, conv, alice, "one").await;
        let key = IdempotencyKey::new("read-1");

        let command = || MarkReadCommand {
            conversation_id: conv,
            reader: Actor::user(bob),
            target: ReadTarget::Through(first.id()),
            idempotency_key: Some(key.clone()),
        };
        let original = d.mark_read(command()).await.unwrap();
        say(&d, conv, alice, "two").await;
        let replay = d.mark_read(command()).await.unwrap();

        assert_eq!(original, replay);
        let conversation = d.conversations.load(conv).await.unwrap();
        assert_eq!(conversation.unread_count(bob).unwrap(), 1);
    }
}

mod event_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_publishes_message_and_mention_events() {
        let d = dispatcher();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob, carol]).await;
        let mut notifications = d.events().subscribe_notifications();

        let sent = d
            .send_message(SendMessageCommand {
                conversation_id: conv,
                sender: Actor::user(alice),
                draft: MessageDraft::text("@bob review please").with_mentions(vec![bob, alice]),
                idempotency_key: None,
            })
            .await
            .unwrap()
            .message;

        match notifications.try_recv().unwrap() {
            NotificationEvent::MessageCreated {
                message_id,
                recipient_ids,
                ..
            } => {
                assert_eq!(message_id, sent.id());
                assert_eq!(recipient_ids, vec![bob, carol]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match notifications.try_recv().unwrap() {
            NotificationEvent::MentionCreated { recipient_ids, .. } => {
                assert_eq!(recipient_ids, vec![bob]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_send_publishes_nothing() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = d
            .create_group(CreateGroupCommand {
                creator: Actor::user(alice),
                spec: GroupSpec {
                    title: "Announcements".to_string(),
                    member_ids: vec![bob],
                    settings: Some(ConversationSettings {
                        locked: true,
                        ..ConversationSettings::default()
                    }),
                    ..GroupSpec::default()
                },
                initial_message: None,
            })
            .await
            .unwrap()
            .id();
        let mut notifications = d.events().subscribe_notifications();

        let err = d
            .send_message(SendMessageCommand {
                conversation_id: conv,
                sender: Actor::user(bob),
                draft: MessageDraft::text("can I talk?"),
                idempotency_key: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Forbidden(_)));
        assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(d.metrics().command_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_typing_events_fire_on_visible_changes() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;
        let mut realtime = d.events().subscribe_realtime();

        assert!(d.set_typing(Actor::user(bob), conv, true).await.unwrap());
        assert!(!d.set_typing(Actor::user(bob), conv, true).await.unwrap());
        let started = realtime.try_recv().unwrap();
        assert_eq!(started.event, RealtimeEvent::typing(conv, bob, true));
        assert!(started.reaches(alice));
        assert!(matches!(realtime.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(
            d.active_typers(Actor::user(alice), conv).await.unwrap(),
            vec![bob]
        );

        // sending a message ends the typing signal
        say(&d, conv, bob, "done typing").await;
        assert_eq!(
            realtime.try_recv().unwrap().event,
            RealtimeEvent::typing(conv, bob, false)
        );
        assert!(d.active_typers(Actor::user(alice), conv).await.unwrap().is_empty());

        let outsider = Actor::user(Uuid::new_v4());
        assert!(d.set_typing(outsider, conv, true).await.is_err());
    }

    #[tokio::test]
    async fn test_read_publishes_read_updated() {
        let d = dispatcher();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = group(&d, alice, &[bob]).await;
        let message = say(&d, conv, alice, "read me").await;
        let mut realtime = d.events().subscribe_realtime();

        read_through(&d, conv, bob, message.id()).await;
        let delivery = realtime.try_recv().unwrap();
        assert_eq!(delivery.audience(), &[alice, bob][..]);
        match &delivery.event {
            RealtimeEvent::ReadUpdated {
                user_id, payload, ..
            } => {
                assert_eq!(*user_id, bob);
                assert_eq!(payload.unread_count, 0);
                assert_eq!(payload.read_message_ids, vec![message.id()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
