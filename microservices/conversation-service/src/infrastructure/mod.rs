//! Infrastructure module

pub mod conversation_store;
pub mod directory;
pub mod event_bus;
pub mod identity;
pub mod locks;
pub mod message_store;

pub use conversation_store::{ConversationStore, InMemoryConversationStore};
pub use directory::InMemoryDirectory;
pub use event_bus::{EventBus, RealtimeDelivery};
pub use identity::{IdentityVerifier, JwtIdentityVerifier};
pub use locks::ConversationLocks;
pub use message_store::{InMemoryMessageStore, MessageStore};
