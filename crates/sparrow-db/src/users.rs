use anyhow::Result;
use rusqlite::Connection;

use crate::models::UserRow;
use crate::{Database, OptionalExt};

const USER_COLUMNS: &str =
    "id, username, email, full_name, password, bio, location, website, avatar_url, created_at";

impl Database {
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        full_name: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, full_name, password)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, email, full_name, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "username = ?1", username)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Patch-style profile update; `None` fields are left untouched.
    pub fn update_profile(
        &self,
        id: &str,
        full_name: Option<&str>,
        bio: Option<&str>,
        location: Option<&str>,
        website: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    full_name  = COALESCE(?2, full_name),
                    bio        = COALESCE(?3, bio),
                    location   = COALESCE(?4, location),
                    website    = COALESCE(?5, website),
                    avatar_url = COALESCE(?6, avatar_url)
                 WHERE id = ?1",
                (id, full_name, bio, location, website, avatar_url),
            )?;
            Ok(())
        })
    }

    // -- Follow graph --

    /// Returns true if the edge was newly created (idempotent insert).
    pub fn follow(&self, follower_id: &str, followee_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
                (follower_id, followee_id),
            )?;
            Ok(changed > 0)
        })
    }

    /// Returns true if an edge existed and was removed.
    pub fn unfollow(&self, follower_id: &str, followee_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                (follower_id, followee_id),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn is_following(&self, follower_id: &str, followee_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                    (follower_id, followee_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(exists.is_some())
        })
    }

    pub fn follower_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM follows WHERE followee_id = ?1",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn following_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Case-insensitive substring match on username or full name,
    /// excluding `exclude_id`, capped at `limit`.
    pub fn search_users(&self, query: &str, exclude_id: &str, limit: u32) -> Result<Vec<UserRow>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped.to_lowercase());

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id != ?1
                   AND (LOWER(username) LIKE ?2 ESCAPE '\\'
                        OR LOWER(full_name) LIKE ?2 ESCAPE '\\')
                 ORDER BY username
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((exclude_id, &pattern, limit), map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, predicate: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], map_user_row).optional()?;
    Ok(row)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        password: row.get(4)?,
        bio: row.get(5)?,
        location: row.get(6)?,
        website: row.get(7)?,
        avatar_url: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed_user(db: &Database, id: &str, username: &str) {
        db.create_user(
            id,
            username,
            &format!("{username}@example.com"),
            &format!("{username} fullname"),
            "hash",
        )
        .unwrap();
    }

    #[test]
    fn follow_is_idempotent_and_symmetric_counts() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "a", "alice");
        seed_user(&db, "b", "bob");

        assert!(db.follow("a", "b").unwrap());
        assert!(!db.follow("a", "b").unwrap()); // duplicate edge ignored
        assert!(db.is_following("a", "b").unwrap());
        assert!(!db.is_following("b", "a").unwrap());

        assert_eq!(db.follower_count("b").unwrap(), 1);
        assert_eq!(db.following_count("a").unwrap(), 1);

        assert!(db.unfollow("a", "b").unwrap());
        assert!(!db.unfollow("a", "b").unwrap());
        assert_eq!(db.follower_count("b").unwrap(), 0);
    }

    #[test]
    fn search_matches_username_and_full_name_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "a", "alice");
        seed_user(&db, "b", "bobby");
        seed_user(&db, "c", "carol");

        let hits = db.search_users("BOB", "a", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].username, "bobby");

        // requester excluded from their own results
        let hits = db.search_users("alice", "a", 10).unwrap();
        assert!(hits.is_empty());

        // LIKE wildcards in the query are treated literally
        let hits = db.search_users("%", "a", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn profile_update_patches_only_provided_fields() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "a", "alice");

        db.update_profile("a", None, Some("hello"), Some("berlin"), None, None)
            .unwrap();
        db.update_profile("a", Some("Alice A."), None, None, None, None)
            .unwrap();

        let user = db.get_user_by_id("a").unwrap().unwrap();
        assert_eq!(user.full_name, "Alice A.");
        assert_eq!(user.bio.as_deref(), Some("hello"));
        assert_eq!(user.location.as_deref(), Some("berlin"));
        assert!(user.website.is_none());
    }
}
