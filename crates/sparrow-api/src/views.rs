//! Row-to-wire mapping. DB rows carry string ids and timestamps; the
//! helpers here turn them into the typed API shapes, warning (rather
//! than failing a whole page) on corrupt values.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use sparrow_db::models::{
    CommentRow, MentionRow, MessageRow, NotificationRow, PostRow, ReadRow, UserRow,
};
use sparrow_db::parse_timestamp;
use sparrow_types::api::{
    CommentView, MessageResponse, NotificationResponse, PageQuery, PostPreview, PostResponse,
    ReplyView,
};
use sparrow_types::models::{
    MessageType, NotificationKind, ReadReceipt, UserSummary, Visibility,
};

use crate::error::ApiError;

/// Clamp a page query into (page, limit, offset). The offset multiply is
/// checked: a page number large enough to overflow it cannot address any
/// real row, so it is rejected rather than wrapped.
pub fn page_window(query: &PageQuery, limit_max: u32) -> Result<(u32, u32, u32), ApiError> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, limit_max);
    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| ApiError::bad_request("page is out of range"))?;
    Ok((page, limit, offset))
}

pub fn parse_id(s: &str) -> Uuid {
    s.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}': {}", s, e);
        Uuid::default()
    })
}

pub fn user_summary(row: &UserRow) -> UserSummary {
    UserSummary {
        id: parse_id(&row.id),
        username: row.username.clone(),
        full_name: row.full_name.clone(),
        avatar_url: row.avatar_url.clone(),
    }
}

pub fn message_response(row: &MessageRow, reads: &[ReadRow]) -> MessageResponse {
    let read_by = reads
        .iter()
        .filter(|r| r.message_id == row.id)
        .map(|r| ReadReceipt {
            user_id: parse_id(&r.user_id),
            read_at: parse_timestamp(&r.read_at),
        })
        .collect();

    MessageResponse {
        id: parse_id(&row.id),
        conversation_id: parse_id(&row.conversation_id),
        sender: UserSummary {
            id: parse_id(&row.sender_id),
            username: row.sender_username.clone(),
            full_name: row.sender_full_name.clone(),
            avatar_url: row.sender_avatar_url.clone(),
        },
        content: row.content.clone(),
        message_type: MessageType::parse(&row.message_type).unwrap_or(MessageType::Text),
        media_url: row.media_url.clone(),
        read_by,
        edited: row.edited,
        edited_at: row.edited_at.as_deref().map(parse_timestamp),
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Nest replies under their parent comments. The store keeps both in one
/// table in insertion order; the wire shape is a fixed two-level tree.
/// `mentions` carries every mention row of the post; each is matched to
/// its comment here.
pub fn comment_tree(rows: Vec<CommentRow>, mentions: &[MentionRow]) -> Vec<CommentView> {
    let mut comments: Vec<CommentView> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let author = UserSummary {
            id: parse_id(&row.author_id),
            username: row.author_username.clone(),
            full_name: row.author_full_name.clone(),
            avatar_url: row.author_avatar_url.clone(),
        };
        let mentioned: Vec<UserSummary> = mentions
            .iter()
            .filter(|m| m.comment_id == row.id)
            .map(|m| UserSummary {
                id: parse_id(&m.user_id),
                username: m.username.clone(),
                full_name: m.full_name.clone(),
                avatar_url: m.avatar_url.clone(),
            })
            .collect();

        match row.parent_comment_id {
            None => {
                index_by_id.insert(row.id.clone(), comments.len());
                comments.push(CommentView {
                    id: parse_id(&row.id),
                    author,
                    text: row.text,
                    mentions: mentioned,
                    created_at: parse_timestamp(&row.created_at),
                    replies: Vec::new(),
                });
            }
            Some(parent_id) => {
                let reply = ReplyView {
                    id: parse_id(&row.id),
                    author,
                    text: row.text,
                    reply_to: row.reply_to_user_id.as_deref().map(parse_id),
                    mentions: mentioned,
                    created_at: parse_timestamp(&row.created_at),
                };
                match index_by_id.get(&parent_id) {
                    Some(&i) => comments[i].replies.push(reply),
                    // Parent missing from the page: orphaned reply, drop it.
                    None => warn!("Reply {} has unknown parent {}", reply.id, parent_id),
                }
            }
        }
    }

    comments
}

pub fn post_response(
    row: PostRow,
    comments: Vec<CommentRow>,
    mentions: &[MentionRow],
) -> PostResponse {
    PostResponse {
        id: parse_id(&row.id),
        author: UserSummary {
            id: parse_id(&row.author_id),
            username: row.author_username,
            full_name: row.author_full_name,
            avatar_url: row.author_avatar_url,
        },
        text: row.text,
        media_url: row.media_url,
        visibility: Visibility::parse(&row.visibility).unwrap_or(Visibility::Public),
        created_at: parse_timestamp(&row.created_at),
        like_count: row.like_count.max(0) as u64,
        liked_by_viewer: row.liked_by_viewer,
        comments: comment_tree(comments, mentions),
    }
}

pub fn notification_response(row: NotificationRow) -> NotificationResponse {
    let post = row.post_id.as_deref().map(|post_id| PostPreview {
        id: parse_id(post_id),
        text: row.post_text.clone(),
        media_url: row.post_media_url.clone(),
    });

    NotificationResponse {
        id: parse_id(&row.id),
        from: UserSummary {
            id: parse_id(&row.from_id),
            username: row.from_username,
            full_name: row.from_full_name,
            avatar_url: row.from_avatar_url,
        },
        kind: NotificationKind::parse(&row.kind).unwrap_or(NotificationKind::Like),
        post,
        body: row.body,
        read: row.read,
        created_at: parse_timestamp(&row.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment_row(id: &str, parent: Option<&str>, text: &str) -> CommentRow {
        CommentRow {
            id: id.to_string(),
            post_id: "p".to_string(),
            author_id: Uuid::new_v4().to_string(),
            author_username: "u".to_string(),
            author_full_name: "U".to_string(),
            author_avatar_url: None,
            parent_comment_id: parent.map(str::to_string),
            reply_to_user_id: None,
            text: text.to_string(),
            created_at: "2025-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn tree_nests_replies_under_parents() {
        let a = Uuid::new_v4().to_string();
        let b = Uuid::new_v4().to_string();
        let rows = vec![
            comment_row(&a, None, "first"),
            comment_row(&b, None, "second"),
            comment_row(&Uuid::new_v4().to_string(), Some(&a), "reply to first"),
            comment_row(&Uuid::new_v4().to_string(), Some(&a), "another reply"),
        ];

        let tree = comment_tree(rows, &[]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].text, "first");
        assert_eq!(tree[0].replies.len(), 2);
        assert_eq!(tree[0].replies[1].text, "another reply");
        assert!(tree[1].replies.is_empty());
    }

    #[test]
    fn orphaned_replies_are_dropped() {
        let rows = vec![comment_row(
            &Uuid::new_v4().to_string(),
            Some("missing"),
            "orphan",
        )];
        assert!(comment_tree(rows, &[]).is_empty());
    }

    #[test]
    fn mentions_attach_to_their_comment() {
        let a = Uuid::new_v4().to_string();
        let b = Uuid::new_v4().to_string();
        let mentioned = Uuid::new_v4().to_string();
        let rows = vec![comment_row(&a, None, "hey @carol"), comment_row(&b, None, "plain")];
        let mentions = vec![MentionRow {
            comment_id: a.clone(),
            user_id: mentioned.clone(),
            username: "carol".to_string(),
            full_name: "Carol".to_string(),
            avatar_url: None,
        }];

        let tree = comment_tree(rows, &mentions);
        assert_eq!(tree[0].mentions.len(), 1);
        assert_eq!(tree[0].mentions[0].username, "carol");
        assert_eq!(tree[0].mentions[0].id, mentioned.parse::<Uuid>().unwrap());
        assert!(tree[1].mentions.is_empty());
    }

    #[test]
    fn page_window_rejects_overflowing_pages() {
        let query = PageQuery {
            page: u32::MAX,
            limit: 20,
        };
        let err = page_window(&query, 50).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // A huge page with limit 1 still fits and must not panic.
        let (page, limit, offset) = page_window(
            &PageQuery {
                page: u32::MAX,
                limit: 1,
            },
            50,
        )
        .unwrap();
        assert_eq!(page, u32::MAX);
        assert_eq!(limit, 1);
        assert_eq!(offset, u32::MAX - 1);

        let (page, limit, offset) = page_window(&PageQuery { page: 3, limit: 20 }, 50).unwrap();
        assert_eq!((page, limit, offset), (3, 20, 40));
    }
}
