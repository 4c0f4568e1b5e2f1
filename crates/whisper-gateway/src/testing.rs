//! Shared fixture for the gateway's unit tests: an in-memory store with one
//! group conversation and a handful of users.

use std::sync::Arc;

use uuid::Uuid;

use whisper_db::Database;
use whisper_types::events::GatewayEvent;
use whisper_types::models::{Membership, Message};

use crate::Gateway;
use crate::identity::JwtVerifier;
use crate::registry::Session;

pub(crate) struct Harness {
    pub db: Arc<Database>,
    pub gateway: Gateway,
    pub verifier: Arc<JwtVerifier>,
    pub conversation: Uuid,
    /// Admin member.
    pub admin: Uuid,
    pub alice: Uuid,
    pub bob: Uuid,
    /// Registered user with no membership.
    pub outsider: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let verifier = Arc::new(JwtVerifier::new("test-secret", None, None));
        let gateway = Gateway::new(db.clone(), verifier.clone());

        let admin = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        for (id, name) in [(admin, "admin"), (alice, "alice"), (bob, "bob"), (outsider, "outsider")] {
            db.create_user(id, name).unwrap();
        }

        let conversation = Uuid::new_v4();
        db.create_conversation(
            conversation,
            true,
            Some("crew"),
            &[(admin, true), (alice, false), (bob, false)],
        )
        .unwrap();

        Self {
            db,
            gateway,
            verifier,
            conversation,
            admin,
            alice,
            bob,
            outsider,
        }
    }

    pub fn token(&self, user_id: Uuid) -> String {
        self.verifier
            .issue(user_id, "tester", chrono::Duration::minutes(5))
            .unwrap()
    }

    pub async fn connect(&self, user_id: Uuid) -> Session {
        self.gateway
            .registry
            .on_connect(&self.token(user_id))
            .await
            .unwrap()
    }

    pub fn membership(&self, user_id: Uuid) -> Option<Membership> {
        self.db
            .get_membership(self.conversation, user_id)
            .unwrap()
            .map(|row| row.try_into().unwrap())
    }

    pub fn unread(&self, user_id: Uuid) -> u32 {
        self.membership(user_id).unwrap().unread_count
    }

    pub fn message(&self, id: Uuid) -> Message {
        self.db.get_message(id).unwrap().unwrap().try_into().unwrap()
    }

    /// Send as `sender` and return the id of the created message.
    pub async fn send(&self, sender: Uuid, body: &str) -> Uuid {
        let mut session = self.connect(sender).await;
        let outcome = self
            .gateway
            .pipeline
            .send_message(sender, self.conversation, body.to_string())
            .await
            .unwrap();
        assert!(outcome.is_applied());

        let id = drain(&mut session)
            .into_iter()
            .find_map(|event| match event {
                GatewayEvent::MessageCreated { id, .. } => Some(id),
                _ => None,
            })
            .unwrap();
        self.gateway
            .registry
            .on_disconnect(session.conn_id, sender, "test done")
            .await;
        id
    }
}

/// Everything currently queued for a session.
pub(crate) fn drain(session: &mut Session) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = session.events.try_recv() {
        events.push(event);
    }
    events
}
