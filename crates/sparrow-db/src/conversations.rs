use anyhow::Result;
use rusqlite::Connection;

use crate::models::{ConversationRow, MessageRow, ReadRow};
use crate::{Database, OptionalExt};

const MESSAGE_SELECT: &str = "
    SELECT m.id, m.conversation_id, m.sender_id, u.username, u.full_name, u.avatar_url,
           m.content, m.message_type, m.media_url, m.edited, m.edited_at, m.created_at
    FROM messages m
    JOIN users u ON m.sender_id = u.id";

impl Database {
    /// Find the conversation for an unordered participant pair, creating
    /// it if absent. The pair is stored sorted under a UNIQUE constraint,
    /// so concurrent calls for the same pair converge on one row and
    /// (A,B) / (B,A) always resolve to the same conversation.
    pub fn find_or_create_conversation(
        &self,
        candidate_id: &str,
        user_x: &str,
        user_y: &str,
    ) -> Result<ConversationRow> {
        let (user_a, user_b) = if user_x < user_y {
            (user_x, user_y)
        } else {
            (user_y, user_x)
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, user_a, user_b) VALUES (?1, ?2, ?3)",
                (candidate_id, user_a, user_b),
            )?;
            let row = query_conversation_by_pair(conn, user_a, user_b)?
                .ok_or_else(|| anyhow::anyhow!("conversation vanished after insert"))?;
            Ok(row)
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_a, user_b, last_message_id, last_activity
                 FROM conversations WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], map_conversation_row).optional()?;
            Ok(row)
        })
    }

    /// All conversations containing `user_id`, most recent activity first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_a, user_b, last_message_id, last_activity
                 FROM conversations
                 WHERE user_a = ?1 OR user_b = ?1
                 ORDER BY last_activity DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Persist a message, seed the sender's read receipt, and bump the
    /// conversation's last message / activity. One lock, three writes.
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        message_type: &str,
        media_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, message_type, media_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, conversation_id, sender_id, content, message_type, media_url),
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
                (id, sender_id),
            )?;
            conn.execute(
                "UPDATE conversations
                 SET last_message_id = ?2,
                     last_activity = (SELECT created_at FROM messages WHERE id = ?2)
                 WHERE id = ?1",
                (conversation_id, id),
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([id], map_message_row).optional()?;
            Ok(row)
        })
    }

    /// One page of a conversation's messages, newest first. The API layer
    /// reverses the page into chronological order.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT} WHERE m.conversation_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((conversation_id, limit, offset), map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Mark every message in the conversation not sent by `user_id` as
    /// read by them. INSERT OR IGNORE keeps the receipt list free of
    /// duplicates no matter how often this runs.
    pub fn mark_conversation_read(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id)
                 SELECT id, ?2 FROM messages
                 WHERE conversation_id = ?1 AND sender_id != ?2",
                (conversation_id, user_id),
            )?;
            Ok(())
        })
    }

    /// Batch-fetch read receipts for a set of message ids.
    pub fn get_reads_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReadRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, read_at FROM message_reads WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReadRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        read_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Delete a message; its read receipts cascade and a dangling
    /// last_message pointer on the conversation is set NULL.
    pub fn delete_message(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

fn query_conversation_by_pair(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_a, user_b, last_message_id, last_activity
         FROM conversations WHERE user_a = ?1 AND user_b = ?2",
    )?;
    let row = stmt
        .query_row((user_a, user_b), map_conversation_row)
        .optional()?;
    Ok(row)
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        last_message_id: row.get(3)?,
        last_activity: row.get(4)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        sender_full_name: row.get(4)?,
        sender_avatar_url: row.get(5)?,
        content: row.get(6)?,
        message_type: row.get(7)?,
        media_url: row.get(8)?,
        edited: row.get(9)?,
        edited_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use uuid::Uuid;

    fn seed_user(db: &Database, id: &str, username: &str) {
        db.create_user(
            id,
            username,
            &format!("{username}@example.com"),
            username,
            "hash",
        )
        .unwrap();
    }

    fn new_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "a", "alice");
        seed_user(&db, "b", "bob");
        seed_user(&db, "c", "carol");
        db
    }

    fn send(db: &Database, conversation_id: &str, sender: &str, content: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_message(&id, conversation_id, sender, content, "text", None)
            .unwrap();
        id
    }

    #[test]
    fn find_or_create_is_order_independent() {
        let db = new_db();
        let first = db.find_or_create_conversation("conv-1", "a", "b").unwrap();
        let second = db.find_or_create_conversation("conv-2", "b", "a").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, "conv-1");

        // a third user gets their own conversation
        let other = db.find_or_create_conversation("conv-3", "a", "c").unwrap();
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn send_updates_last_message_and_activity() {
        let db = new_db();
        let conv = db.find_or_create_conversation("conv-1", "a", "b").unwrap();

        let m1 = send(&db, &conv.id, "a", "first");
        let m2 = send(&db, &conv.id, "b", "second");

        let conv = db.get_conversation("conv-1").unwrap().unwrap();
        assert_eq!(conv.last_message_id.as_deref(), Some(m2.as_str()));

        let listed = db.list_conversations("a").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].last_message_id.as_deref(), Some(m2.as_str()));

        // the first message still exists untouched
        assert!(db.get_message(&m1).unwrap().is_some());
    }

    #[test]
    fn message_pages_are_disjoint_and_ordered() {
        let db = new_db();
        let conv = db.find_or_create_conversation("conv-1", "a", "b").unwrap();
        for i in 0..7 {
            send(&db, &conv.id, "a", &format!("msg {i}"));
        }

        let newest = db.list_messages(&conv.id, 3, 0).unwrap();
        let middle = db.list_messages(&conv.id, 3, 3).unwrap();
        let oldest = db.list_messages(&conv.id, 3, 6).unwrap();
        assert_eq!(newest.len(), 3);
        assert_eq!(middle.len(), 3);
        assert_eq!(oldest.len(), 1);

        let mut seen: Vec<String> = vec![];
        for row in newest.iter().chain(&middle).chain(&oldest) {
            assert!(!seen.contains(&row.id), "duplicate across pages");
            seen.push(row.id.clone());
        }

        // newest-first within and across pages
        let contents: Vec<&str> = newest
            .iter()
            .chain(&middle)
            .chain(&oldest)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(
            contents,
            vec!["msg 6", "msg 5", "msg 4", "msg 3", "msg 2", "msg 1", "msg 0"]
        );
        assert_eq!(db.count_messages(&conv.id).unwrap(), 7);
    }

    #[test]
    fn read_receipts_are_idempotent() {
        let db = new_db();
        let conv = db.find_or_create_conversation("conv-1", "a", "b").unwrap();
        let m1 = send(&db, &conv.id, "a", "hello");

        // sender's own receipt seeded at insert
        let reads = db.get_reads_for_messages(&[m1.clone()]).unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].user_id, "a");

        db.mark_conversation_read(&conv.id, "b").unwrap();
        db.mark_conversation_read(&conv.id, "b").unwrap();
        db.mark_conversation_read(&conv.id, "b").unwrap();

        let mut reads = db.get_reads_for_messages(&[m1.clone()]).unwrap();
        reads.sort_by(|x, y| x.user_id.cmp(&y.user_id));
        assert_eq!(reads.len(), 2);
        assert_eq!(reads[0].user_id, "a");
        assert_eq!(reads[1].user_id, "b");

        // marking never adds a receipt for the sender's own messages
        db.mark_conversation_read(&conv.id, "a").unwrap();
        let reads = db.get_reads_for_messages(&[m1]).unwrap();
        assert_eq!(reads.len(), 2);
    }

    #[test]
    fn delete_message_clears_dangling_last_message() {
        let db = new_db();
        let conv = db.find_or_create_conversation("conv-1", "a", "b").unwrap();
        let m1 = send(&db, &conv.id, "a", "only one");

        db.delete_message(&m1).unwrap();
        assert!(db.get_message(&m1).unwrap().is_none());

        let conv = db.get_conversation("conv-1").unwrap().unwrap();
        assert!(conv.last_message_id.is_none());
        assert!(db.get_reads_for_messages(&[m1]).unwrap().is_empty());
    }
}
