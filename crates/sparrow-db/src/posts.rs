use anyhow::Result;

use crate::models::{CommentRow, MentionRow, PostRow};
use crate::{Database, OptionalExt};

/// Joined post selection: author embedded, like count and whether the
/// viewer (?1) liked it computed inline.
const POST_SELECT: &str = "
    SELECT p.id, p.author_id, u.username, u.full_name, u.avatar_url,
           p.text, p.media_url, p.visibility, p.created_at,
           (SELECT COUNT(*) FROM post_likes pl WHERE pl.post_id = p.id),
           EXISTS(SELECT 1 FROM post_likes pl
                  WHERE pl.post_id = p.id AND pl.user_id = ?1)
    FROM posts p
    JOIN users u ON p.author_id = u.id";

/// A post is visible to the viewer (?1) when they own it, it is public,
/// or it is followers-only and the viewer follows the author. Private
/// posts never reach anyone but the owner.
const VISIBILITY_PREDICATE: &str = "
    (p.author_id = ?1
     OR p.visibility = 'public'
     OR (p.visibility = 'followers'
         AND EXISTS(SELECT 1 FROM follows f
                    WHERE f.follower_id = ?1 AND f.followee_id = p.author_id)))";

impl Database {
    pub fn insert_post(
        &self,
        id: &str,
        author_id: &str,
        text: Option<&str>,
        media_url: Option<&str>,
        visibility: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, text, media_url, visibility)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, author_id, text, media_url, visibility),
            )?;
            Ok(())
        })
    }

    /// Fetch a post regardless of visibility (callers enforce access).
    pub fn get_post(&self, post_id: &str, viewer_id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!("{POST_SELECT} WHERE p.id = ?2");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row((viewer_id, post_id), map_post_row).optional()?;
            Ok(row)
        })
    }

    /// All of `author_id`'s posts the viewer may see, newest first.
    pub fn list_posts_by_author(&self, author_id: &str, viewer_id: &str) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{POST_SELECT} WHERE p.author_id = ?2 AND {VISIBILITY_PREDICATE}
                 ORDER BY p.created_at DESC, p.rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((viewer_id, author_id), map_post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Global feed page, visibility-filtered for the viewer, newest first.
    pub fn list_all_posts(&self, viewer_id: &str, limit: u32, offset: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{POST_SELECT} WHERE {VISIBILITY_PREDICATE}
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((viewer_id, limit, offset), map_post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_all_posts(&self, viewer_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM posts p WHERE {VISIBILITY_PREDICATE}");
            Ok(conn.query_row(&sql, [viewer_id], |row| row.get(0))?)
        })
    }

    pub fn count_posts_by_author(&self, author_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
                [author_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn update_post_text(&self, post_id: &str, text: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE posts SET text = ?2 WHERE id = ?1", (post_id, text))?;
            Ok(())
        })
    }

    pub fn set_post_visibility(&self, post_id: &str, visibility: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE posts SET visibility = ?2 WHERE id = ?1",
                (post_id, visibility),
            )?;
            Ok(())
        })
    }

    /// Likes, comments and notifications referencing the post cascade.
    pub fn delete_post(&self, post_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM posts WHERE id = ?1", [post_id])?;
            Ok(())
        })
    }

    // -- Likes --

    /// Toggle a like: removes if present, inserts if not.
    /// Returns (liked, like_count) after the toggle.
    pub fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<(bool, i64)> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                (post_id, user_id),
            )?;
            let liked = if removed == 0 {
                conn.execute(
                    "INSERT INTO post_likes (post_id, user_id) VALUES (?1, ?2)",
                    (post_id, user_id),
                )?;
                true
            } else {
                false
            };
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            Ok((liked, count))
        })
    }

    // -- Comments --

    /// Comment plus its mention rows in one lock. INSERT OR IGNORE keeps
    /// a user mentioned twice in the same comment down to one row.
    pub fn insert_comment(
        &self,
        id: &str,
        post_id: &str,
        author_id: &str,
        parent_comment_id: Option<&str>,
        reply_to_user_id: Option<&str>,
        text: &str,
        mention_user_ids: &[String],
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, parent_comment_id, reply_to_user_id, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, post_id, author_id, parent_comment_id, reply_to_user_id, text),
            )?;
            for user_id in mention_user_ids {
                conn.execute(
                    "INSERT OR IGNORE INTO comment_mentions (comment_id, user_id) VALUES (?1, ?2)",
                    (id, user_id),
                )?;
            }
            Ok(())
        })
    }

    pub fn get_comment(&self, comment_id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!("{COMMENT_SELECT} WHERE c.id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([comment_id], map_comment_row).optional()?;
            Ok(row)
        })
    }

    /// All comments and replies of a post in insertion order; the caller
    /// nests replies under their parents.
    pub fn list_comments(&self, post_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{COMMENT_SELECT} WHERE c.post_id = ?1
                 ORDER BY c.created_at, c.rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([post_id], map_comment_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mentioned users for every comment of a post, fetched in one query
    /// and matched back up by the caller.
    pub fn list_comment_mentions(&self, post_id: &str) -> Result<Vec<MentionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cm.comment_id, cm.user_id, u.username, u.full_name, u.avatar_url
                 FROM comment_mentions cm
                 JOIN comments c ON cm.comment_id = c.id
                 JOIN users u ON cm.user_id = u.id
                 WHERE c.post_id = ?1",
            )?;
            let rows = stmt
                .query_map([post_id], |row| {
                    Ok(MentionRow {
                        comment_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        full_name: row.get(3)?,
                        avatar_url: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

const COMMENT_SELECT: &str = "
    SELECT c.id, c.post_id, c.author_id, u.username, u.full_name, u.avatar_url,
           c.parent_comment_id, c.reply_to_user_id, c.text, c.created_at
    FROM comments c
    JOIN users u ON c.author_id = u.id";

fn map_post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_username: row.get(2)?,
        author_full_name: row.get(3)?,
        author_avatar_url: row.get(4)?,
        text: row.get(5)?,
        media_url: row.get(6)?,
        visibility: row.get(7)?,
        created_at: row.get(8)?,
        like_count: row.get(9)?,
        liked_by_viewer: row.get(10)?,
    })
}

fn map_comment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_username: row.get(3)?,
        author_full_name: row.get(4)?,
        author_avatar_url: row.get(5)?,
        parent_comment_id: row.get(6)?,
        reply_to_user_id: row.get(7)?,
        text: row.get(8)?,
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
            username,
            "hash",
        )
        .unwrap();
    }

    fn db_with_users() -> Database {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "owner", "owner");
        seed_user(&db, "follower", "follower");
        seed_user(&db, "stranger", "stranger");
        db.follow("follower", "owner").unwrap();
        db
    }

    #[test]
    fn visibility_filtering() {
        let db = db_with_users();
        db.insert_post("p1", "owner", Some("pub"), None, "public").unwrap();
        db.insert_post("p2", "owner", Some("fol"), None, "followers").unwrap();
        db.insert_post("p3", "owner", Some("priv"), None, "private").unwrap();

        let owner_view = db.list_posts_by_author("owner", "owner").unwrap();
        assert_eq!(owner_view.len(), 3);

        let follower_view = db.list_posts_by_author("owner", "follower").unwrap();
        let texts: Vec<_> = follower_view.iter().filter_map(|p| p.text.as_deref()).collect();
        assert_eq!(texts, vec!["fol", "pub"]);

        let stranger_view = db.list_posts_by_author("owner", "stranger").unwrap();
        let texts: Vec<_> = stranger_view.iter().filter_map(|p| p.text.as_deref()).collect();
        assert_eq!(texts, vec!["pub"]);

        // private posts never appear in the global feed either
        let feed = db.list_all_posts("stranger", 50, 0).unwrap();
        assert!(feed.iter().all(|p| p.text.as_deref() != Some("priv")));
    }

    #[test]
    fn like_toggle_round_trip() {
        let db = db_with_users();
        db.insert_post("p1", "owner", Some("hi"), None, "public").unwrap();

        let (liked, count) = db.toggle_like("p1", "follower").unwrap();
        assert!(liked);
        assert_eq!(count, 1);

        let post = db.get_post("p1", "follower").unwrap().unwrap();
        assert!(post.liked_by_viewer);
        assert_eq!(post.like_count, 1);

        let (liked, count) = db.toggle_like("p1", "follower").unwrap();
        assert!(!liked);
        assert_eq!(count, 0);
    }

    #[test]
    fn comments_keep_insertion_order() {
        let db = db_with_users();
        db.insert_post("p1", "owner", Some("hi"), None, "public").unwrap();
        db.insert_comment("c1", "p1", "follower", None, None, "first", &[]).unwrap();
        db.insert_comment("c2", "p1", "stranger", None, None, "second", &[]).unwrap();
        db.insert_comment("r1", "p1", "owner", Some("c1"), Some("follower"), "a reply", &[])
            .unwrap();

        let comments = db.list_comments("p1").unwrap();
        assert_eq!(comments.len(), 3);
        assert_eq!(comments[0].text, "first");
        assert_eq!(comments[1].text, "second");
        assert_eq!(comments[2].parent_comment_id.as_deref(), Some("c1"));
    }

    #[test]
    fn comment_mentions_are_stored_once_per_user() {
        let db = db_with_users();
        db.insert_post("p1", "owner", Some("hi"), None, "public").unwrap();
        db.insert_comment(
            "c1",
            "p1",
            "follower",
            None,
            None,
            "@owner @owner look",
            &["owner".to_string(), "owner".to_string()],
        )
        .unwrap();

        let mentions = db.list_comment_mentions("p1").unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].comment_id, "c1");
        assert_eq!(mentions[0].user_id, "owner");

        db.delete_post("p1").unwrap();
        assert!(db.list_comment_mentions("p1").unwrap().is_empty());
    }

    #[test]
    fn delete_post_cascades_likes_and_comments() {
        let db = db_with_users();
        db.insert_post("p1", "owner", Some("hi"), None, "public").unwrap();
        db.toggle_like("p1", "follower").unwrap();
        db.insert_comment("c1", "p1", "follower", None, None, "first", &[]).unwrap();

        db.delete_post("p1").unwrap();
        assert!(db.get_post("p1", "owner").unwrap().is_none());
        assert!(db.list_comments("p1").unwrap().is_empty());
    }
}
