use anyhow::Result;

use crate::Database;
use crate::models::NotificationRow;

const NOTIFICATION_SELECT: &str = "
    SELECT n.id, n.from_id, u.username, u.full_name, u.avatar_url,
           n.kind, n.post_id, p.text, p.media_url,
           n.body, n.read, n.created_at
    FROM notifications n
    JOIN users u ON n.from_id = u.id
    LEFT JOIN posts p ON n.post_id = p.id";

impl Database {
    /// No de-duplication: like, unlike, re-like yields two like rows.
    pub fn insert_notification(
        &self,
        id: &str,
        from_id: &str,
        to_id: &str,
        kind: &str,
        post_id: Option<&str>,
        body: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, from_id, to_id, kind, post_id, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, from_id, to_id, kind, post_id, body),
            )?;
            Ok(())
        })
    }

    pub fn list_notifications(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{NOTIFICATION_SELECT} WHERE n.to_id = ?1
                 ORDER BY n.created_at DESC, n.rowid DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((user_id, limit, offset), |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        from_id: row.get(1)?,
                        from_username: row.get(2)?,
                        from_full_name: row.get(3)?,
                        from_avatar_url: row.get(4)?,
                        kind: row.get(5)?,
                        post_id: row.get(6)?,
                        post_text: row.get(7)?,
                        post_media_url: row.get(8)?,
                        body: row.get(9)?,
                        read: row.get(10)?,
                        created_at: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_notifications(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE to_id = ?1",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn unread_notification_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE to_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Recipient-scoped mark-as-read. Returns false when the id does not
    /// exist or belongs to someone else; marking an already-read row is a
    /// no-op success.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND to_id = ?2",
                (id, user_id),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE notifications SET read = 1 WHERE to_id = ?1 AND read = 0",
                [user_id],
            )?;
            Ok(())
        })
    }

    /// Recipient-scoped delete. Returns false when nothing was removed.
    pub fn delete_notification(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND to_id = ?2",
                (id, user_id),
            )?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn new_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [("a", "alice"), ("b", "bob")] {
            db.create_user(id, name, &format!("{name}@example.com"), name, "hash")
                .unwrap();
        }
        db
    }

    #[test]
    fn mark_all_read_leaves_read_rows_untouched() {
        let db = new_db();
        for i in 0..5 {
            db.insert_notification(&format!("n{i}"), "a", "b", "follow", None, "followed you")
                .unwrap();
        }
        // two already read
        assert!(db.mark_notification_read("n0", "b").unwrap());
        assert!(db.mark_notification_read("n1", "b").unwrap());
        assert_eq!(db.unread_notification_count("b").unwrap(), 3);

        db.mark_all_notifications_read("b").unwrap();
        assert_eq!(db.unread_notification_count("b").unwrap(), 0);

        let all = db.list_notifications("b", 50, 0).unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|n| n.read));
    }

    #[test]
    fn notifications_are_recipient_scoped() {
        let db = new_db();
        db.insert_notification("n1", "a", "b", "follow", None, "followed you")
            .unwrap();

        // the sender cannot read or delete the recipient's notification
        assert!(!db.mark_notification_read("n1", "a").unwrap());
        assert!(!db.delete_notification("n1", "a").unwrap());
        assert_eq!(db.unread_notification_count("b").unwrap(), 1);

        assert!(db.delete_notification("n1", "b").unwrap());
        assert_eq!(db.count_notifications("b").unwrap(), 0);
    }

    #[test]
    fn re_likes_are_not_deduplicated() {
        let db = new_db();
        db.insert_post("p1", "b", Some("hi"), None, "public").unwrap();
        db.insert_notification("n1", "a", "b", "like", Some("p1"), "liked your post")
            .unwrap();
        db.insert_notification("n2", "a", "b", "like", Some("p1"), "liked your post")
            .unwrap();

        let all = db.list_notifications("b", 50, 0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].post_text.as_deref(), Some("hi"));
    }
}
