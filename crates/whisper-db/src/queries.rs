//! Store operations. Each free function works on a plain `&Connection` so the
//! core can compose several of them inside one `Database::transaction`; the
//! `Database` methods cover the single-statement reads and writes.

use crate::models::{
    ConversationRow, ConversationSummaryRow, MembershipRow, MessageRow, ReactionRow, UserRow, parse_id,
};
use crate::{Database, to_timestamp};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use whisper_types::models::MAX_TITLE_CHARS;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)",
                (id.to_string(), username),
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| user_by_id(conn, id))
    }

    pub fn touch_presence(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| touch_presence(conn, user_id, at))
    }

    // -- Conversations --

    /// Create a conversation together with its initial members.
    /// `members` pairs each user id with its admin flag.
    pub fn create_conversation(
        &self,
        id: Uuid,
        is_group: bool,
        title: Option<&str>,
        members: &[(Uuid, bool)],
    ) -> Result<()> {
        if let Some(title) = title {
            if title.chars().count() > MAX_TITLE_CHARS {
                bail!("conversation title longer than {} characters", MAX_TITLE_CHARS);
            }
        }
        let now = Utc::now();
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO conversations (id, title, is_group, created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![id.to_string(), title, is_group, to_timestamp(now)],
            )?;
            for &(user_id, is_admin) in members {
                insert_membership(tx, id, user_id, is_admin, now)?;
            }
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| conversation_by_id(conn, id))
    }

    pub fn list_conversation_summaries(&self, user_id: Uuid) -> Result<Vec<ConversationSummaryRow>> {
        self.with_conn(|conn| query_conversation_summaries(conn, user_id))
    }

    // -- Memberships --

    pub fn get_membership(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<MembershipRow>> {
        self.with_conn(|conn| membership(conn, conversation_id, user_id))
    }

    pub fn list_conversation_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| conversation_ids_for_user(conn, user_id))
    }

    // -- Messages --

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| message_by_id(conn, id))
    }

    /// Newest first. `before` is an exclusive `sent_at` cursor.
    pub fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id, limit, before))
    }

    // -- Reactions --

    pub fn get_reactions(&self, message_id: Uuid) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| reactions_for_message(conn, message_id))
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, message_id, user_id, emote, created_at FROM reactions
                 WHERE message_id IN ({}) ORDER BY created_at",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids.iter()), reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

// -- Users --

pub fn user_by_id(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, username, created_at, last_seen_at FROM users WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    created_at: row.get(2)?,
                    last_seen_at: row.get(3)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

/// Stamp `last_seen_at`. Returns false if the user does not exist.
pub fn touch_presence(conn: &Connection, user_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE users SET last_seen_at = ?2 WHERE id = ?1",
        (user_id.to_string(), to_timestamp(at)),
    )?;
    Ok(changed == 1)
}

// -- Conversations --

pub fn conversation_by_id(conn: &Connection, id: Uuid) -> Result<Option<ConversationRow>> {
    let row = conn
        .query_row(
            "SELECT id, title, is_group, created_at, last_activity_at FROM conversations WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    is_group: row.get(2)?,
                    created_at: row.get(3)?,
                    last_activity_at: row.get(4)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

pub fn set_conversation_activity(conn: &Connection, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET last_activity_at = ?2 WHERE id = ?1",
        (conversation_id.to_string(), to_timestamp(at)),
    )?;
    Ok(())
}

fn query_conversation_summaries(conn: &Connection, user_id: Uuid) -> Result<Vec<ConversationSummaryRow>> {
    // Direct conversations are titled after the other participant.
    let mut stmt = conn.prepare(
        "SELECT c.id,
                CASE WHEN c.is_group THEN c.title ELSE (
                    SELECT u.username FROM conversation_members om
                    JOIN users u ON u.id = om.user_id
                    WHERE om.conversation_id = c.id AND om.user_id <> ?1
                    LIMIT 1
                ) END,
                c.is_group,
                (SELECT CASE WHEN m.is_deleted THEN NULL ELSE m.body END FROM messages m
                 WHERE m.conversation_id = c.id ORDER BY m.sent_at DESC LIMIT 1),
                (SELECT m.sent_at FROM messages m
                 WHERE m.conversation_id = c.id ORDER BY m.sent_at DESC LIMIT 1),
                cm.unread_count
         FROM conversation_members cm
         JOIN conversations c ON c.id = cm.conversation_id
         WHERE cm.user_id = ?1
         ORDER BY c.last_activity_at DESC",
    )?;

    let rows = stmt
        .query_map([user_id.to_string()], |row| {
            Ok(ConversationSummaryRow {
                conversation_id: row.get(0)?,
                title: row.get(1)?,
                is_group: row.get(2)?,
                last_body: row.get(3)?,
                last_sent_at: row.get(4)?,
                unread_count: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

// -- Memberships --

pub fn membership(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<Option<MembershipRow>> {
    let row = conn
        .query_row(
            "SELECT conversation_id, user_id, is_admin, joined_at, last_read_at, unread_count
             FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
            (conversation_id.to_string(), user_id.to_string()),
            |row| {
                Ok(MembershipRow {
                    conversation_id: row.get(0)?,
                    user_id: row.get(1)?,
                    is_admin: row.get(2)?,
                    joined_at: row.get(3)?,
                    last_read_at: row.get(4)?,
                    unread_count: row.get(5)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

pub fn conversation_ids_for_user(conn: &Connection, user_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT conversation_id FROM conversation_members WHERE user_id = ?1")?;
    let raw = stmt
        .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raw.iter().map(|id| parse_id(id)).collect()
}

/// Insert a membership. Returns false if the pair already exists.
pub fn insert_membership(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
    is_admin: bool,
    joined_at: DateTime<Utc>,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, is_admin, joined_at, unread_count)
         VALUES (?1, ?2, ?3, ?4, 0)",
        rusqlite::params![
            conversation_id.to_string(),
            user_id.to_string(),
            is_admin,
            to_timestamp(joined_at)
        ],
    )?;
    Ok(inserted == 1)
}

/// Returns false if there was no such membership.
pub fn delete_membership(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
        (conversation_id.to_string(), user_id.to_string()),
    )?;
    Ok(deleted == 1)
}

/// Add one unread to every member except `exclude_user_id`. Returns the number
/// of memberships touched.
pub fn increment_unread(conn: &Connection, conversation_id: Uuid, exclude_user_id: Uuid) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE conversation_members SET unread_count = unread_count + 1
         WHERE conversation_id = ?1 AND user_id <> ?2",
        (conversation_id.to_string(), exclude_user_id.to_string()),
    )?;
    Ok(changed)
}

/// Zero the unread counter and stamp `last_read_at`. Returns false if the
/// caller is not a member.
pub fn mark_read(conn: &Connection, conversation_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE conversation_members SET unread_count = 0, last_read_at = ?3
         WHERE conversation_id = ?1 AND user_id = ?2",
        (conversation_id.to_string(), user_id.to_string(), to_timestamp(at)),
    )?;
    Ok(changed == 1)
}

// -- Messages --

pub fn insert_message(conn: &Connection, message: &MessageRow) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, body, sent_at, edited_at, is_deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            message.id,
            message.conversation_id,
            message.sender_id,
            message.body,
            message.sent_at,
            message.edited_at,
            message.is_deleted
        ],
    )?;
    Ok(())
}

pub fn message_by_id(conn: &Connection, id: Uuid) -> Result<Option<MessageRow>> {
    let row = conn
        .query_row(
            "SELECT id, conversation_id, sender_id, body, sent_at, edited_at, is_deleted
             FROM messages WHERE id = ?1",
            [id.to_string()],
            message_from_row,
        )
        .optional()?;

    Ok(row)
}

/// Replace the body of a live message. Deleted messages are never touched;
/// returns false in that case.
pub fn update_message_body(conn: &Connection, id: Uuid, body: &str, edited_at: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET body = ?2, edited_at = ?3 WHERE id = ?1 AND is_deleted = 0",
        (id.to_string(), body, to_timestamp(edited_at)),
    )?;
    Ok(changed == 1)
}

/// Returns false if the message was missing or already deleted.
pub fn soft_delete_message(conn: &Connection, id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0",
        [id.to_string()],
    )?;
    Ok(changed == 1)
}

fn query_messages(
    conn: &Connection,
    conversation_id: Uuid,
    limit: u32,
    before: Option<&str>,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, body, sent_at, edited_at, is_deleted
         FROM messages
         WHERE conversation_id = ?1 AND (?2 IS NULL OR sent_at < ?2)
         ORDER BY sent_at DESC
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(
            rusqlite::params![conversation_id.to_string(), before, limit],
            message_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        sent_at: row.get(4)?,
        edited_at: row.get(5)?,
        is_deleted: row.get(6)?,
    })
}

// -- Reactions --

/// Toggle a reaction: removes if exists, inserts if not.
/// Returns true if the reaction was added, false if it was removed.
/// Callers run this inside a transaction so the check and the write are one unit.
pub fn toggle_reaction(
    conn: &Connection,
    id: Uuid,
    message_id: Uuid,
    user_id: Uuid,
    emote: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emote = ?3",
        (message_id.to_string(), user_id.to_string(), emote),
    )?;
    if removed > 0 {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO reactions (id, message_id, user_id, emote, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            id.to_string(),
            message_id.to_string(),
            user_id.to_string(),
            emote,
            to_timestamp(at)
        ],
    )?;
    Ok(true)
}

pub fn reactions_for_message(conn: &Connection, message_id: Uuid) -> Result<Vec<ReactionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, message_id, user_id, emote, created_at FROM reactions
         WHERE message_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt
        .query_map([message_id.to_string()], reaction_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn reaction_from_row(row: &Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        emote: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisper_types::models::{Membership, Message};

    struct Fixture {
        db: Database,
        conversation: Uuid,
        alice: Uuid,
        bob: Uuid,
        carol: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        db.create_user(alice, "alice").unwrap();
        db.create_user(bob, "bob").unwrap();
        db.create_user(carol, "carol").unwrap();

        let conversation = Uuid::new_v4();
        db.create_conversation(conversation, true, Some("team"), &[(alice, true), (bob, false)])
            .unwrap();

        Fixture {
            db,
            conversation,
            alice,
            bob,
            carol,
        }
    }

    fn new_message(conversation: Uuid, sender: Uuid, body: &str) -> MessageRow {
        MessageRow {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation.to_string(),
            sender_id: sender.to_string(),
            body: body.to_string(),
            sent_at: to_timestamp(Utc::now()),
            edited_at: None,
            is_deleted: false,
        }
    }

    fn unread(f: &Fixture, user: Uuid) -> u32 {
        f.db.get_membership(f.conversation, user).unwrap().unwrap().unread_count
    }

    #[test]
    fn send_in_one_transaction_increments_only_others() {
        let f = fixture();
        let row = new_message(f.conversation, f.alice, "hi");
        let id = parse_id(&row.id).unwrap();

        f.db.transaction(|tx| {
            insert_message(tx, &row)?;
            let touched = increment_unread(tx, f.conversation, f.alice)?;
            assert_eq!(touched, 1);
            set_conversation_activity(tx, f.conversation, Utc::now())
        })
        .unwrap();

        assert_eq!(unread(&f, f.alice), 0);
        assert_eq!(unread(&f, f.bob), 1);

        let stored: Message = f.db.get_message(id).unwrap().unwrap().try_into().unwrap();
        assert_eq!(stored.body, "hi");
        assert!(!stored.is_deleted);
    }

    #[test]
    fn failed_transaction_rolls_back_everything() {
        let f = fixture();
        let mut row = new_message(f.conversation, f.alice, "x");
        row.body = "x".repeat(4001);

        let result = f.db.transaction(|tx| {
            increment_unread(tx, f.conversation, f.alice)?;
            insert_message(tx, &row)
        });

        assert!(result.is_err());
        assert_eq!(unread(&f, f.bob), 0);
    }

    #[test]
    fn mark_read_resets_counter_for_members_only() {
        let f = fixture();
        f.db.with_conn(|conn| increment_unread(conn, f.conversation, f.alice)).unwrap();

        let now = Utc::now();
        assert!(f.db.with_conn(|conn| mark_read(conn, f.conversation, f.bob, now)).unwrap());
        assert!(!f.db.with_conn(|conn| mark_read(conn, f.conversation, f.carol, now)).unwrap());

        let membership: Membership = f.db.get_membership(f.conversation, f.bob).unwrap().unwrap().try_into().unwrap();
        assert_eq!(membership.unread_count, 0);
        assert!(membership.last_read_at.is_some());
    }

    #[test]
    fn deleted_messages_cannot_be_edited_or_deleted_again() {
        let f = fixture();
        let row = new_message(f.conversation, f.alice, "original");
        let id = parse_id(&row.id).unwrap();
        f.db.with_conn(|conn| insert_message(conn, &row)).unwrap();

        assert!(f.db.with_conn(|conn| soft_delete_message(conn, id)).unwrap());
        assert!(!f.db.with_conn(|conn| soft_delete_message(conn, id)).unwrap());
        assert!(!f.db.with_conn(|conn| update_message_body(conn, id, "new", Utc::now())).unwrap());

        let stored = f.db.get_message(id).unwrap().unwrap();
        assert_eq!(stored.body, "original");
        assert!(stored.is_deleted);
        assert!(stored.edited_at.is_none());
    }

    #[test]
    fn toggle_reaction_twice_restores_previous_state() {
        let f = fixture();
        let row = new_message(f.conversation, f.alice, "react to me");
        let id = parse_id(&row.id).unwrap();
        f.db.with_conn(|conn| insert_message(conn, &row)).unwrap();

        let added = f.db
            .transaction(|tx| toggle_reaction(tx, Uuid::new_v4(), id, f.bob, "👍", Utc::now()))
            .unwrap();
        assert!(added);
        assert_eq!(f.db.get_reactions(id).unwrap().len(), 1);

        let added = f.db
            .transaction(|tx| toggle_reaction(tx, Uuid::new_v4(), id, f.bob, "👍", Utc::now()))
            .unwrap();
        assert!(!added);
        assert!(f.db.get_reactions(id).unwrap().is_empty());
    }

    #[test]
    fn membership_pairs_are_unique() {
        let f = fixture();
        let now = Utc::now();
        assert!(!f.db.with_conn(|conn| insert_membership(conn, f.conversation, f.bob, false, now)).unwrap());
        assert!(f.db.with_conn(|conn| insert_membership(conn, f.conversation, f.carol, false, now)).unwrap());
        assert!(f.db.with_conn(|conn| delete_membership(conn, f.conversation, f.carol)).unwrap());
        assert!(!f.db.with_conn(|conn| delete_membership(conn, f.conversation, f.carol)).unwrap());

        let ids = f.db.list_conversation_ids(f.bob).unwrap();
        assert_eq!(ids, vec![f.conversation]);
        assert!(f.db.list_conversation_ids(f.carol).unwrap().is_empty());
    }

    #[test]
    fn summaries_hide_deleted_bodies_and_title_direct_chats() {
        let f = fixture();
        let direct = Uuid::new_v4();
        f.db.create_conversation(direct, false, None, &[(f.alice, false), (f.carol, false)])
            .unwrap();

        let row = new_message(direct, f.carol, "secret");
        let id = parse_id(&row.id).unwrap();
        f.db.transaction(|tx| {
            insert_message(tx, &row)?;
            increment_unread(tx, direct, f.carol)?;
            set_conversation_activity(tx, direct, Utc::now())
        })
        .unwrap();

        let summaries = f.db.list_conversation_summaries(f.alice).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].conversation_id, direct.to_string());
        assert_eq!(summaries[0].title.as_deref(), Some("carol"));
        assert_eq!(summaries[0].last_body.as_deref(), Some("secret"));
        assert_eq!(summaries[0].unread_count, 1);
        assert_eq!(summaries[1].title.as_deref(), Some("team"));
        assert!(summaries[1].last_sent_at.is_none());

        f.db.with_conn(|conn| soft_delete_message(conn, id)).unwrap();
        let summaries = f.db.list_conversation_summaries(f.alice).unwrap();
        assert!(summaries[0].last_body.is_none());
        assert!(summaries[0].last_sent_at.is_some());
    }

    #[test]
    fn presence_stamp_requires_existing_user() {
        let f = fixture();
        assert!(f.db.touch_presence(f.alice, Utc::now()).unwrap());
        assert!(!f.db.touch_presence(Uuid::new_v4(), Utc::now()).unwrap());
        assert!(f.db.get_user(f.alice).unwrap().unwrap().last_seen_at.is_some());
        assert!(f.db.get_user(f.bob).unwrap().unwrap().last_seen_at.is_none());
    }

    #[test]
    fn overlong_title_is_rejected() {
        let f = fixture();
        let title = "x".repeat(MAX_TITLE_CHARS + 1);
        let result = f.db.create_conversation(Uuid::new_v4(), true, Some(&title), &[(f.alice, true)]);
        assert!(result.is_err());
    }
}
