use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            full_name   TEXT NOT NULL,
            password    TEXT NOT NULL,
            bio         TEXT,
            location    TEXT,
            website     TEXT,
            avatar_url  TEXT,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE TABLE IF NOT EXISTS follows (
            follower_id TEXT NOT NULL REFERENCES users(id),
            followee_id TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            UNIQUE(follower_id, followee_id)
        );

        CREATE INDEX IF NOT EXISTS idx_follows_followee
            ON follows(followee_id);

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id),
            text        TEXT,
            media_url   TEXT,
            visibility  TEXT NOT NULL DEFAULT 'public'
                        CHECK (visibility IN ('public', 'followers', 'private')),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_author
            ON posts(author_id, created_at);

        CREATE TABLE IF NOT EXISTS post_likes (
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            UNIQUE(post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id                  TEXT PRIMARY KEY,
            post_id             TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            author_id           TEXT NOT NULL REFERENCES users(id),
            parent_comment_id   TEXT REFERENCES comments(id) ON DELETE CASCADE,
            reply_to_user_id    TEXT REFERENCES users(id),
            text                TEXT NOT NULL,
            created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE INDEX IF NOT EXISTS idx_comments_post
            ON comments(post_id, created_at);

        CREATE TABLE IF NOT EXISTS comment_mentions (
            comment_id  TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            UNIQUE(comment_id, user_id)
        );

        -- Participant pair stored sorted (user_a < user_b); the UNIQUE
        -- constraint makes find-or-create race-free.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            user_a          TEXT NOT NULL REFERENCES users(id),
            user_b          TEXT NOT NULL REFERENCES users(id),
            last_message_id TEXT REFERENCES messages(id) ON DELETE SET NULL,
            last_activity   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            CHECK (user_a < user_b),
            UNIQUE(user_a, user_b)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            message_type    TEXT NOT NULL DEFAULT 'text'
                            CHECK (message_type IN ('text', 'image')),
            media_url       TEXT,
            edited          INTEGER NOT NULL DEFAULT 0,
            edited_at       TEXT,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS message_reads (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            read_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            UNIQUE(message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id          TEXT PRIMARY KEY,
            from_id     TEXT NOT NULL REFERENCES users(id),
            to_id       TEXT NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL CHECK (kind IN ('like', 'follow', 'comment')),
            post_id     TEXT REFERENCES posts(id) ON DELETE CASCADE,
            body        TEXT NOT NULL,
            read        INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_to
            ON notifications(to_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
