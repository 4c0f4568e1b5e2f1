use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{trace, warn};
use uuid::Uuid;

use whisper_types::events::GatewayEvent;

/// Handle of one live connection.
pub type ConnectionId = Uuid;

/// Events queued per connection before further deliveries to it are dropped.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Group fan-out: tracks every live connection, the identity bound to it and
/// the conversation groups it is subscribed to.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: RwLock<Registry>,
}

/// Both indexes live under one lock so they can never disagree.
#[derive(Default)]
struct Registry {
    /// conn_id -> subscriber
    connections: HashMap<ConnectionId, Subscriber>,
    /// conversation_id -> subscribed connections
    groups: HashMap<Uuid, HashSet<ConnectionId>>,
}

struct Subscriber {
    user_id: Uuid,
    tx: mpsc::Sender<GatewayEvent>,
    groups: HashSet<Uuid>,
}

impl Registry {
    fn subscribe(&mut self, conn_id: ConnectionId, group: Uuid) -> bool {
        let Some(subscriber) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if !subscriber.groups.insert(group) {
            return false;
        }
        self.groups.entry(group).or_default().insert(conn_id);
        true
    }

    fn unsubscribe(&mut self, conn_id: ConnectionId, group: Uuid) -> bool {
        let Some(subscriber) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if !subscriber.groups.remove(&group) {
            return false;
        }
        if let Some(members) = self.groups.get_mut(&group) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.groups.remove(&group);
            }
        }
        true
    }

    fn connections_of(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, s)| s.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    /// Register a new connection for `user_id`. Returns its handle and the
    /// receiving end of its outbound queue.
    pub async fn register(&self, user_id: Uuid) -> (ConnectionId, mpsc::Receiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.inner.registry.write().await.connections.insert(
            conn_id,
            Subscriber {
                user_id,
                tx,
                groups: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Drop a connection and every group subscription it held.
    /// Returns the identity that was bound to it.
    pub async fn unregister(&self, conn_id: ConnectionId) -> Option<Uuid> {
        let mut registry = self.inner.registry.write().await;
        let subscriber = registry.connections.remove(&conn_id)?;
        for group in &subscriber.groups {
            if let Some(members) = registry.groups.get_mut(group) {
                members.remove(&conn_id);
                if members.is_empty() {
                    registry.groups.remove(group);
                }
            }
        }
        Some(subscriber.user_id)
    }

    /// Identity bound to a live connection.
    pub async fn user_of(&self, conn_id: ConnectionId) -> Option<Uuid> {
        self.inner
            .registry
            .read()
            .await
            .connections
            .get(&conn_id)
            .map(|s| s.user_id)
    }

    /// Groups a live connection is subscribed to.
    pub async fn groups_of(&self, conn_id: ConnectionId) -> Vec<Uuid> {
        self.inner
            .registry
            .read()
            .await
            .connections
            .get(&conn_id)
            .map(|s| s.groups.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns false if the connection is unknown or already subscribed.
    pub async fn subscribe(&self, conn_id: ConnectionId, group: Uuid) -> bool {
        self.inner.registry.write().await.subscribe(conn_id, group)
    }

    /// Returns false if the connection was not subscribed.
    pub async fn unsubscribe(&self, conn_id: ConnectionId, group: Uuid) -> bool {
        self.inner.registry.write().await.unsubscribe(conn_id, group)
    }

    /// Subscribe every live connection of `user_id`. Returns how many were newly subscribed.
    pub async fn subscribe_user(&self, user_id: Uuid, group: Uuid) -> usize {
        let mut registry = self.inner.registry.write().await;
        registry
            .connections_of(user_id)
            .into_iter()
            .filter(|conn_id| registry.subscribe(*conn_id, group))
            .count()
    }

    /// Detach every live connection of `user_id` from the group.
    pub async fn unsubscribe_user(&self, user_id: Uuid, group: Uuid) -> usize {
        let mut registry = self.inner.registry.write().await;
        registry
            .connections_of(user_id)
            .into_iter()
            .filter(|conn_id| registry.unsubscribe(*conn_id, group))
            .count()
    }

    /// Deliver `event` to the connections subscribed to `group` right now.
    /// Enqueueing never waits: a full or closed queue loses this event for
    /// that subscriber only. Returns the number of queues that accepted it.
    pub async fn broadcast(&self, group: Uuid, event: GatewayEvent) -> usize {
        let registry = self.inner.registry.read().await;
        let Some(members) = registry.groups.get(&group) else {
            return 0;
        };

        members
            .iter()
            .filter_map(|conn_id| registry.connections.get(conn_id).map(|s| (conn_id, s)))
            .filter(|(conn_id, subscriber)| deliver(**conn_id, subscriber, event.clone()))
            .count()
    }

    /// Send an event to a single connection, e.g. a failure report.
    pub async fn send_to_connection(&self, conn_id: ConnectionId, event: GatewayEvent) -> bool {
        let registry = self.inner.registry.read().await;
        match registry.connections.get(&conn_id) {
            Some(subscriber) => deliver(conn_id, subscriber, event),
            None => false,
        }
    }

    /// Number of connections currently subscribed to `group`.
    pub async fn subscriber_count(&self, group: Uuid) -> usize {
        self.inner
            .registry
            .read()
            .await
            .groups
            .get(&group)
            .map_or(0, HashSet::len)
    }

    pub async fn is_subscribed(&self, conn_id: ConnectionId, group: Uuid) -> bool {
        self.inner
            .registry
            .read()
            .await
            .connections
            .get(&conn_id)
            .is_some_and(|s| s.groups.contains(&group))
    }
}

fn deliver(conn_id: ConnectionId, subscriber: &Subscriber, event: GatewayEvent) -> bool {
    match subscriber.tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                "Outbound queue full for connection {} (user {}), dropping event",
                conn_id, subscriber.user_id
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            trace!("Connection {} already closed, skipping event", conn_id);
            false
        }
    }
}
