/// Database row types — these map directly to SQLite rows.
/// Distinct from the sparrow-types API models so the DB layer stays
/// independent of the wire format. Joined author/sender columns are
/// denormalized into the row to avoid N+1 lookups.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub author_full_name: String,
    pub author_avatar_url: Option<String>,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub visibility: String,
    pub created_at: String,
    pub like_count: i64,
    pub liked_by_viewer: bool,
}

pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_username: String,
    pub author_full_name: String,
    pub author_avatar_url: Option<String>,
    pub parent_comment_id: Option<String>,
    pub reply_to_user_id: Option<String>,
    pub text: String,
    pub created_at: String,
}

/// One mentioned user of one comment, author columns denormalized the
/// same way the comment and message selects do it.
pub struct MentionRow {
    pub comment_id: String,
    pub user_id: String,
    pub username: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

pub struct ConversationRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub last_message_id: Option<String>,
    pub last_activity: String,
}

impl ConversationRow {
    /// The participant that is not `user_id`, or `None` if `user_id` is
    /// not part of this conversation.
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        if self.user_a == user_id {
            Some(&self.user_b)
        } else if self.user_b == user_id {
            Some(&self.user_a)
        } else {
            None
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_full_name: String,
    pub sender_avatar_url: Option<String>,
    pub content: String,
    pub message_type: String,
    pub media_url: Option<String>,
    pub edited: bool,
    pub edited_at: Option<String>,
    pub created_at: String,
}

pub struct ReadRow {
    pub message_id: String,
    pub user_id: String,
    pub read_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub from_id: String,
    pub from_username: String,
    pub from_full_name: String,
    pub from_avatar_url: Option<String>,
    pub kind: String,
    pub post_id: Option<String>,
    pub post_text: Option<String>,
    pub post_media_url: Option<String>,
    pub body: String,
    pub read: bool,
    pub created_at: String,
}
