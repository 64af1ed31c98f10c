use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use tracing::warn;
use uuid::Uuid;

use sparrow_types::api::{
    AddCommentRequest, Claims, LikeResponse, PageQuery, Pagination, PostResponse, PostsPage,
    SetVisibilityRequest, UpdatePostRequest,
};
use sparrow_types::models::{NotificationKind, Visibility};

use crate::AppState;
use crate::error::ApiError;
use crate::views::{page_window, post_response};

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const TEXT_MAX: usize = 280;
const FEED_LIMIT_MAX: u32 = 50;

/// POST /posts — multipart form with an optional `text` field and an
/// optional `image` part. At least one of the two is required.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut text: Option<String> = None;
    let mut image: Option<(Vec<u8>, &'static str)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("text") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid text field: {}", e)))?;
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    text = Some(trimmed.to_string());
                }
            }
            Some("image") => {
                let content_type = field.content_type().map(str::to_string);
                let ext = match content_type.as_deref() {
                    Some("image/png") => "png",
                    Some("image/jpeg") => "jpg",
                    Some("image/gif") => "gif",
                    Some("image/webp") => "webp",
                    other => {
                        return Err(ApiError::bad_request(format!(
                            "unsupported image type: {}",
                            other.unwrap_or("unknown")
                        )));
                    }
                };
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid image field: {}", e)))?;
                if bytes.len() > MAX_IMAGE_BYTES {
                    return Err(ApiError::bad_request("image exceeds the 5MB limit"));
                }
                image = Some((bytes.to_vec(), ext));
            }
            _ => {}
        }
    }

    if let Some(t) = &text {
        if t.chars().count() > TEXT_MAX {
            return Err(ApiError::bad_request("text must be 280 characters or fewer"));
        }
    }
    if text.is_none() && image.is_none() {
        return Err(ApiError::bad_request("a post needs text or an image"));
    }

    let media_url = match image {
        Some((bytes, ext)) => {
            let filename = format!("{}.{}", Uuid::new_v4(), ext);
            let path = state.media_dir.join(&filename);
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| anyhow::anyhow!("failed to store media at {:?}: {}", path, e))?;
            Some(format!("/media/{}", filename))
        }
        None => None,
    };

    let post_id = Uuid::new_v4();
    state.db.insert_post(
        &post_id.to_string(),
        &claims.sub.to_string(),
        text.as_deref(),
        media_url.as_deref(),
        Visibility::Public.as_str(),
    )?;

    let response = load_post(&state, &post_id.to_string(), &claims.sub.to_string())?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /posts — global feed, visibility-filtered for the viewer.
pub async fn list_feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, limit, offset) = page_window(&query, FEED_LIMIT_MAX)?;
    let viewer = claims.sub.to_string();

    let state_clone = state.clone();
    let (rows, total) = tokio::task::spawn_blocking(move || {
        let rows = state_clone.db.list_all_posts(&viewer, limit, offset)?;
        let total = state_clone.db.count_all_posts(&viewer)?;
        Ok::<_, anyhow::Error>((rows, total))
    })
    .await??;

    let mut posts = Vec::with_capacity(rows.len());
    for row in rows {
        let comments = state.db.list_comments(&row.id)?;
        let mentions = state.db.list_comment_mentions(&row.id)?;
        posts.push(post_response(row, comments, &mentions));
    }

    Ok(Json(PostsPage {
        posts,
        pagination: Pagination::new(page, limit, total.max(0) as u64),
    }))
}

/// GET /users/{user}/posts — a profile's posts as the viewer may see them.
pub async fn list_user_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let rows = state
        .db
        .list_posts_by_author(&owner.id, &claims.sub.to_string())?;

    let mut posts = Vec::with_capacity(rows.len());
    for row in rows {
        let comments = state.db.list_comments(&row.id)?;
        let mentions = state.db.list_comment_mentions(&row.id)?;
        posts.push(post_response(row, comments, &mentions));
    }

    Ok(Json(posts))
}

pub async fn update_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("text cannot be empty"));
    }
    if text.chars().count() > TEXT_MAX {
        return Err(ApiError::bad_request("text must be 280 characters or fewer"));
    }

    let post = owned_post(&state, &post_id, &claims)?;
    state.db.update_post_text(&post.id, text)?;

    let response = load_post(&state, &post.id, &claims.sub.to_string())?;
    Ok(Json(response))
}

pub async fn set_visibility(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<SetVisibilityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post = owned_post(&state, &post_id, &claims)?;
    state
        .db
        .set_post_visibility(&post.id, req.visibility.as_str())?;

    let response = load_post(&state, &post.id, &claims.sub.to_string())?;
    Ok(Json(response))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let post = owned_post(&state, &post_id, &claims)?;

    // Best-effort media cleanup; the post goes away regardless.
    if let Some(media_url) = &post.media_url {
        if let Some(filename) = media_url.strip_prefix("/media/") {
            let path = state.media_dir.join(filename);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove media {:?}: {}", path, e);
            }
        }
    }

    state.db.delete_post(&post.id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let liker = claims.sub.to_string();
    let post = state
        .db
        .get_post(&post_id.to_string(), &liker)?
        .ok_or_else(|| ApiError::not_found("post not found"))?;

    let (liked, like_count) = state.db.toggle_like(&post.id, &liker)?;

    // A fresh like notifies the owner; an unlike does not, and re-liking
    // later creates another row (no de-duplication, like the original).
    if liked && post.author_id != liker {
        state.db.insert_notification(
            &Uuid::new_v4().to_string(),
            &liker,
            &post.author_id,
            NotificationKind::Like.as_str(),
            Some(&post.id),
            "liked your post",
        )?;
    }

    Ok(Json(LikeResponse {
        liked,
        like_count: like_count.max(0) as u64,
    }))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<AddCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("comment cannot be empty"));
    }
    if text.chars().count() > TEXT_MAX {
        return Err(ApiError::bad_request("comment must be 280 characters or fewer"));
    }

    let author = claims.sub.to_string();
    let post = state
        .db
        .get_post(&post_id.to_string(), &author)?
        .ok_or_else(|| ApiError::not_found("post not found"))?;

    // Replies nest exactly one level under a top-level comment.
    let (parent_id, reply_to_user) = match req.reply_to_comment_id {
        Some(parent) => {
            let parent_row = state
                .db
                .get_comment(&parent.to_string())?
                .ok_or_else(|| ApiError::not_found("comment not found"))?;
            if parent_row.post_id != post.id {
                return Err(ApiError::bad_request("comment belongs to a different post"));
            }
            if parent_row.parent_comment_id.is_some() {
                return Err(ApiError::bad_request("replies to replies are not supported"));
            }
            (Some(parent_row.id), Some(parent_row.author_id))
        }
        None => (None, None),
    };

    // @name tokens that resolve to real accounts become mention rows;
    // everything else stays plain text.
    let mut mention_ids: Vec<String> = Vec::new();
    for name in extract_mentions(text) {
        if let Some(user) = state.db.get_user_by_username(&name)? {
            mention_ids.push(user.id);
        }
    }

    state.db.insert_comment(
        &Uuid::new_v4().to_string(),
        &post.id,
        &author,
        parent_id.as_deref(),
        reply_to_user.as_deref(),
        text,
        &mention_ids,
    )?;

    if post.author_id != author {
        let body = if parent_id.is_some() {
            "replied to a comment on your post"
        } else {
            "commented on your post"
        };
        state.db.insert_notification(
            &Uuid::new_v4().to_string(),
            &author,
            &post.author_id,
            NotificationKind::Comment.as_str(),
            Some(&post.id),
            body,
        )?;
    }

    let response = load_post(&state, &post.id, &author)?;
    Ok((StatusCode::CREATED, Json(response)))
}

fn owned_post(
    state: &AppState,
    post_id: &Uuid,
    claims: &Claims,
) -> Result<sparrow_db::models::PostRow, ApiError> {
    let post = state
        .db
        .get_post(&post_id.to_string(), &claims.sub.to_string())?
        .ok_or_else(|| ApiError::not_found("post not found"))?;

    if post.author_id != claims.sub.to_string() {
        return Err(ApiError::forbidden("only the author can modify this post"));
    }
    Ok(post)
}

/// `@username` tokens in comment text, lowercased and deduplicated.
/// Trailing punctuation is cut at the first character a username cannot
/// contain, so "@carol!" still mentions carol.
fn extract_mentions(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        let Some(rest) = token.strip_prefix('@') else {
            continue;
        };
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if name.len() >= 3 && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn load_post(state: &AppState, post_id: &str, viewer_id: &str) -> Result<PostResponse, ApiError> {
    let row = state
        .db
        .get_post(post_id, viewer_id)?
        .ok_or_else(|| ApiError::not_found("post not found"))?;
    let comments = state.db.list_comments(post_id)?;
    let mentions = state.db.list_comment_mentions(post_id)?;
    Ok(post_response(row, comments, &mentions))
}

#[cfg(test)]
mod tests {
    use super::extract_mentions;

    #[test]
    fn mention_extraction() {
        assert_eq!(
            extract_mentions("hey @Carol and @dave_99, seen @carol?"),
            vec!["carol".to_string(), "dave_99".to_string()]
        );
        // Bare '@', too-short names, and plain text yield nothing.
        assert!(extract_mentions("a @ b @ab email@example.com").is_empty());
    }
}
