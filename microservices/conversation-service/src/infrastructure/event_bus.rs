//! In-process event fan-out
//!
//! Publishing never fails a command: a send with no subscribers is simply dropped.
//! Realtime events travel with the audience resolved at publish time, so socket
//! sessions filter without going back to the store.

use huddle_conversation::{NotificationEvent, RealtimeEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// A realtime event and the active members it is meant for
#[derive(Debug)]
pub struct RealtimeDelivery {
    pub event: RealtimeEvent,
    audience: Vec<Uuid>,
}

impl RealtimeDelivery {
    pub fn new(event: RealtimeEvent, audience: Vec<Uuid>) -> Self {
        Self { event, audience }
    }

    pub fn reaches(&self, user_id: Uuid) -> bool {
        self.audience.contains(&user_id)
    }

    pub fn audience(&self) -> &[Uuid] {
        &self.audience
    }
}

#[derive(Clone)]
pub struct EventBus {
    notifications: broadcast::Sender<NotificationEvent>,
    realtime: broadcast::Sender<Arc<RealtimeDelivery>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (notifications, _) = broadcast::channel(capacity);
        let (realtime, _) = broadcast::channel(capacity);
        Self {
            notifications,
            realtime,
        }
    }

    pub fn publish_notification(&self, event: NotificationEvent) {
        if self.notifications.send(event).is_err() {
            debug!("No notification subscribers; event dropped");
        }
    }

    pub fn publish_realtime(&self, event: RealtimeEvent, audience: Vec<Uuid>) {
        let delivery = Arc::new(RealtimeDelivery::new(event, audience));
        if self.realtime.send(delivery).is_err() {
            debug!("No realtime subscribers; event dropped");
        }
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notifications.subscribe()
    }

    pub fn subscribe_realtime(&self) -> broadcast::Receiver<Arc<RealtimeDelivery>> {
        self.realtime.subscribe()
    }
}
