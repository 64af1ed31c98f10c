use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageType, NotificationKind, ReadReceipt, UserSummary, Visibility};

// -- JWT Claims --

/// JWT claims shared between sparrow-api (REST middleware) and
/// sparrow-gateway (WebSocket identify handshake). Canonical definition
/// lives here to keep the two in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserSummary,
    pub token: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserProfileResponse {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub followers_count: u64,
    pub following_count: u64,
    pub posts_count: u64,
    pub is_following: bool,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePostRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetVisibilityRequest {
    pub visibility: Visibility,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddCommentRequest {
    pub text: String,
    /// When set, the new comment is a reply nested under this top-level
    /// comment. Replies to replies are rejected.
    pub reply_to_comment_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ReplyView {
    pub id: Uuid,
    pub author: UserSummary,
    pub text: String,
    pub reply_to: Option<Uuid>,
    pub mentions: Vec<UserSummary>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: Uuid,
    pub author: UserSummary,
    pub text: String,
    pub mentions: Vec<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<ReplyView>,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author: UserSummary,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub like_count: u64,
    pub liked_by_viewer: bool,
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: u64,
}

#[derive(Debug, Serialize)]
pub struct PostsPage {
    pub posts: Vec<PostResponse>,
    pub pagination: Pagination,
}

/// Trimmed post embed carried inside like/comment notifications.
#[derive(Debug, Serialize)]
pub struct PostPreview {
    pub id: Uuid,
    pub text: Option<String>,
    pub media_url: Option<String>,
}

// -- Conversations & messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: UserSummary,
    pub content: String,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub read_by: Vec<ReadReceipt>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    /// The participant that is not the requester.
    pub participant: UserSummary,
    pub last_message: Option<MessageResponse>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessagesPage {
    pub messages: Vec<MessageResponse>,
    pub pagination: Pagination,
}

// -- Notifications --

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub from: UserSummary,
    pub kind: NotificationKind,
    pub post: Option<PostPreview>,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsPage {
    pub notifications: Vec<NotificationResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

// -- Pagination --

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total_items: u64) -> Self {
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(limit.max(1) as u64) as u32
        };
        Self {
            current_page: page,
            total_pages,
            total_items,
            has_more: page < total_pages,
        }
    }
}
