use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use sparrow_db::models::ConversationRow;
use sparrow_types::api::{
    Claims, ConversationResponse, MessageResponse, MessagesPage, PageQuery, Pagination,
    SendMessageRequest,
};
use sparrow_types::events::GatewayEvent;
use sparrow_types::models::{MessageType, UserSummary};

use crate::AppState;
use crate::error::ApiError;
use crate::views::{message_response, page_window, parse_id, user_summary};

const MESSAGES_LIMIT_MAX: u32 = 100;
const SEARCH_RESULT_CAP: u32 = 10;

/// GET /conversations — the requester's conversations, most recent first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let rows = state.db.list_conversations(&me)?;

    let mut conversations = Vec::with_capacity(rows.len());
    for row in rows {
        // Conversations whose other participant no longer resolves are
        // dropped rather than surfaced half-populated.
        match build_conversation(&state, &row, &me)? {
            Some(conversation) => conversations.push(conversation),
            None => continue,
        }
    }

    Ok(Json(conversations))
}

/// GET /conversations/with/{user} — find-or-create for the pair
/// {requester, user}. The sorted-pair uniqueness constraint makes this
/// race-free and order-independent.
pub async fn find_or_create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(other_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if other_id == claims.sub {
        return Err(ApiError::bad_request(
            "you cannot start a conversation with yourself",
        ));
    }

    let me = claims.sub.to_string();
    let other = state
        .db
        .get_user_by_id(&other_id.to_string())?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let row = state
        .db
        .find_or_create_conversation(&Uuid::new_v4().to_string(), &me, &other.id)?;

    let conversation = build_conversation(&state, &row, &me)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    Ok(Json(conversation))
}

/// GET /conversations/{conversation}/messages — one page in chronological
/// order. Marks everything not sent by the requester as read.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let conversation = participant_conversation(&state, &conversation_id, &me)?;

    let (page, limit, offset) = page_window(&query, MESSAGES_LIMIT_MAX)?;

    let state_clone = state.clone();
    let requester = me.clone();
    let conv_id = conversation.id.clone();
    let (rows, reads, total) = tokio::task::spawn_blocking(move || {
        // Mark before fetching so the page reflects the requester's own
        // fresh receipts.
        state_clone.db.mark_conversation_read(&conv_id, &requester)?;

        let rows = state_clone.db.list_messages(&conv_id, limit, offset)?;
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reads = state_clone.db.get_reads_for_messages(&ids)?;
        let total = state_clone.db.count_messages(&conv_id)?;
        Ok::<_, anyhow::Error>((rows, reads, total))
    })
    .await??;

    // The store returns newest-first; the client wants chronological.
    let messages: Vec<MessageResponse> = rows
        .iter()
        .rev()
        .map(|row| message_response(row, &reads))
        .collect();

    Ok(Json(MessagesPage {
        messages,
        pagination: Pagination::new(page, limit, total.max(0) as u64),
    }))
}

/// POST /conversations/{conversation}/messages — persist, then publish.
/// The fan-out is fire-and-forget: an event-layer hiccup never fails the
/// write.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("message content cannot be empty"));
    }

    let me = claims.sub.to_string();
    let conversation = participant_conversation(&state, &conversation_id, &me)?;
    let message_type = req.message_type.unwrap_or(MessageType::Text);

    let message_id = Uuid::new_v4();
    let state_clone = state.clone();
    let conv_id = conversation.id.clone();
    let sender = me.clone();
    let media_url = req.media_url.clone();
    tokio::task::spawn_blocking(move || {
        state_clone.db.insert_message(
            &message_id.to_string(),
            &conv_id,
            &sender,
            &content,
            message_type.as_str(),
            media_url.as_deref(),
        )
    })
    .await??;

    let row = state
        .db
        .get_message(&message_id.to_string())?
        .ok_or_else(|| anyhow::anyhow!("message vanished after insert"))?;
    let reads = state.db.get_reads_for_messages(&[row.id.clone()])?;
    let message = message_response(&row, &reads);

    // Fan out to the conversation's room.
    state.dispatcher.publish(GatewayEvent::NewMessage {
        conversation_id,
        message: message.clone(),
    });
    if let Some(participants) = conversation_participants(&state, &conversation)? {
        state.dispatcher.publish(GatewayEvent::ConversationUpdated {
            conversation_id,
            participants,
            last_message: Box::new(message.clone()),
            last_activity: message.created_at,
        });
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// DELETE /conversations/messages/{message} — sender-only.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .db
        .get_message(&message_id.to_string())?
        .ok_or_else(|| ApiError::not_found("message not found"))?;

    if row.sender_id != claims.sub.to_string() {
        return Err(ApiError::forbidden("only the sender can delete a message"));
    }

    state.db.delete_message(&row.id)?;

    state.dispatcher.publish(GatewayEvent::MessageDeleted {
        conversation_id: parse_id(&row.conversation_id),
        message_id,
    });

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /conversations/search?q= — users one can start a conversation with.
pub async fn search_targets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let q = query.q.trim();
    if q.chars().count() < 2 {
        return Err(ApiError::bad_request(
            "search query must be at least 2 characters",
        ));
    }

    let rows = state
        .db
        .search_users(q, &claims.sub.to_string(), SEARCH_RESULT_CAP)?;
    let users: Vec<UserSummary> = rows.iter().map(user_summary).collect();

    Ok(Json(users))
}

/// Resolve a conversation the requester participates in. Non-participants
/// get the same 404 as a missing conversation so existence never leaks.
fn participant_conversation(
    state: &AppState,
    conversation_id: &Uuid,
    user_id: &str,
) -> Result<ConversationRow, ApiError> {
    let conversation = state
        .db
        .get_conversation(&conversation_id.to_string())?
        .ok_or_else(|| ApiError::not_found("conversation not found"))?;

    if !conversation.has_participant(user_id) {
        return Err(ApiError::not_found("conversation not found"));
    }
    Ok(conversation)
}

/// The conversation rendered for `viewer`: other participant populated,
/// last message (with its sender) embedded. `None` when the other
/// participant's account no longer resolves.
fn build_conversation(
    state: &AppState,
    row: &ConversationRow,
    viewer_id: &str,
) -> Result<Option<ConversationResponse>, ApiError> {
    let Some(other_id) = row.other_participant(viewer_id) else {
        return Ok(None);
    };
    let Some(other) = state.db.get_user_by_id(other_id)? else {
        return Ok(None);
    };

    let last_message = match &row.last_message_id {
        Some(message_id) => match state.db.get_message(message_id)? {
            Some(message_row) => {
                let reads = state.db.get_reads_for_messages(&[message_row.id.clone()])?;
                Some(message_response(&message_row, &reads))
            }
            None => None,
        },
        None => None,
    };

    Ok(Some(ConversationResponse {
        id: parse_id(&row.id),
        participant: user_summary(&other),
        last_message,
        last_activity: sparrow_db::parse_timestamp(&row.last_activity),
    }))
}

/// Both participants as summaries, for the conversation-updated event.
fn conversation_participants(
    state: &AppState,
    row: &ConversationRow,
) -> Result<Option<Vec<UserSummary>>, ApiError> {
    let Some(a) = state.db.get_user_by_id(&row.user_a)? else {
        return Ok(None);
    };
    let Some(b) = state.db.get_user_by_id(&row.user_b)? else {
        return Ok(None);
    };
    Ok(Some(vec![user_summary(&a), user_summary(&b)]))
}
