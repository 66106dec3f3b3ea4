//! Display-name directory

use dashmap::DashMap;
use huddle_conversation::DisplayNames;
use uuid::Uuid;

/// In-memory display names, fed by verified identity claims
#[derive(Default)]
pub struct InMemoryDirectory {
    names: DashMap<Uuid, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, user_id: Uuid, display_name: impl Into<String>) {
        self.names.insert(user_id, display_name.into());
    }
}

impl DisplayNames for InMemoryDirectory {
    fn display_name(&self, user_id: Uuid) -> Option<String> {
        self.names.get(&user_id).map(|n| n.clone())
    }
}
