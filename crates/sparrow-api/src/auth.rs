use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use sparrow_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use sparrow_types::models::UserSummary;

use crate::AppState;
use crate::error::ApiError;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_lowercase();
    let email = req.email.trim().to_string();
    let full_name = req.full_name.trim().to_string();

    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::bad_request("username must be 3-32 characters"));
    }
    if !email.contains('@') {
        return Err(ApiError::bad_request("invalid email address"));
    }
    if full_name.is_empty() {
        return Err(ApiError::bad_request("full name is required"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }

    if state.db.get_user_by_username(&username)?.is_some() {
        return Err(ApiError::conflict("username already taken"));
    }
    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::conflict("email already registered"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    state
        .db
        .create_user(&user_id.to_string(), &username, &email, &full_name, &password_hash)?;

    let token = create_token(&state.jwt_secret, user_id, &username)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserSummary {
                id: user_id,
                username,
                full_name,
                avatar_url: None,
            },
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_lowercase();

    let user = state
        .db
        .get_user_by_username(&username)?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash invalid: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(AuthResponse {
        user: UserSummary {
            id: user_id,
            username: user.username,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
        },
        token,
    }))
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
