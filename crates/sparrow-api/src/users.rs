use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use uuid::Uuid;

use sparrow_types::api::{Claims, UpdateProfileRequest, UserProfileResponse};
use sparrow_types::models::NotificationKind;

use crate::AppState;
use crate::error::ApiError;
use crate::views::parse_id;

const BIO_MAX: usize = 160;
const LOCATION_MAX: usize = 50;
const WEBSITE_MAX: usize = 100;

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_username(&username.to_lowercase())?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    build_profile(&state, &claims, user)
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(full_name) = &req.full_name {
        if full_name.trim().is_empty() {
            return Err(ApiError::bad_request("full name cannot be empty"));
        }
    }
    if req.bio.as_ref().is_some_and(|s| s.chars().count() > BIO_MAX) {
        return Err(ApiError::bad_request("bio must be 160 characters or fewer"));
    }
    if req
        .location
        .as_ref()
        .is_some_and(|s| s.chars().count() > LOCATION_MAX)
    {
        return Err(ApiError::bad_request("location must be 50 characters or fewer"));
    }
    if req
        .website
        .as_ref()
        .is_some_and(|s| s.chars().count() > WEBSITE_MAX)
    {
        return Err(ApiError::bad_request("website must be 100 characters or fewer"));
    }

    let user_id = claims.sub.to_string();
    state.db.update_profile(
        &user_id,
        req.full_name.as_deref().map(str::trim),
        req.bio.as_deref(),
        req.location.as_deref(),
        req.website.as_deref(),
        req.avatar_url.as_deref(),
    )?;

    let user = state
        .db
        .get_user_by_id(&user_id)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    build_profile(&state, &claims, user)
}

pub async fn follow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id == claims.sub {
        return Err(ApiError::bad_request("you cannot follow yourself"));
    }

    let target = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let newly_followed = state
        .db
        .follow(&claims.sub.to_string(), &target.id)?;

    if newly_followed {
        state.db.insert_notification(
            &Uuid::new_v4().to_string(),
            &claims.sub.to_string(),
            &target.id,
            NotificationKind::Follow.as_str(),
            None,
            "started following you",
        )?;
    }

    Ok(Json(serde_json::json!({ "following": true })))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id == claims.sub {
        return Err(ApiError::bad_request("you cannot unfollow yourself"));
    }

    state
        .db
        .unfollow(&claims.sub.to_string(), &user_id.to_string())?;

    Ok(Json(serde_json::json!({ "following": false })))
}

fn build_profile(
    state: &AppState,
    claims: &Claims,
    user: sparrow_db::models::UserRow,
) -> Result<Json<UserProfileResponse>, ApiError> {
    let followers_count = state.db.follower_count(&user.id)?.max(0) as u64;
    let following_count = state.db.following_count(&user.id)?.max(0) as u64;
    let posts_count = state.db.count_posts_by_author(&user.id)?.max(0) as u64;
    let is_following = state
        .db
        .is_following(&claims.sub.to_string(), &user.id)?;

    Ok(Json(UserProfileResponse {
        id: parse_id(&user.id),
        username: user.username,
        full_name: user.full_name,
        bio: user.bio,
        location: user.location,
        website: user.website,
        avatar_url: user.avatar_url,
        created_at: sparrow_db::parse_timestamp(&user.created_at),
        followers_count,
        following_count,
        posts_count,
        is_following,
    }))
}
