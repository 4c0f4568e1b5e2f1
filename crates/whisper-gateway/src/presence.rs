use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::Store;

/// Stamps `last_seen_at` on connect and disconnect. Fire-and-forget: the
/// write runs in its own task and failures are logged and discarded.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Store,
}

impl PresenceTracker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The returned handle may be dropped; tests await it.
    pub fn touch(&self, user_id: Uuid) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            match store.call(move |db| db.touch_presence(user_id, Utc::now())).await {
                Ok(true) => debug!("Stamped presence for {}", user_id),
                Ok(false) => warn!("Presence stamp skipped: no user row for {}", user_id),
                Err(e) => warn!("Presence stamp failed for {}: {}", user_id, e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use whisper_db::Database;

    use super::*;

    #[tokio::test]
    async fn touch_stamps_last_seen() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = Uuid::new_v4();
        db.create_user(user, "alice").unwrap();

        let presence = PresenceTracker::new(Store::new(db.clone()));
        presence.touch(user).await.unwrap();

        assert!(db.get_user(user).unwrap().unwrap().last_seen_at.is_some());
    }

    #[tokio::test]
    async fn unknown_user_is_swallowed() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let presence = PresenceTracker::new(Store::new(db));

        // Completes without panicking even though nothing was written.
        presence.touch(Uuid::new_v4()).await.unwrap();
    }
}
