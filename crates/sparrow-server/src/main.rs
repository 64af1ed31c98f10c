use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Router, middleware};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use sparrow_api::middleware::require_auth;
use sparrow_api::{AppState, AppStateInner, auth, conversations, notifications, posts, users};
use sparrow_gateway::connection;
use sparrow_gateway::dispatcher::Dispatcher;

/// Placeholder JWT secrets that MUST NOT be used outside development.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

fn jwt_secret_usable(secret: &str) -> bool {
    !secret.is_empty() && !PLACEHOLDER_SECRETS.contains(&secret)
}

/// Multipart overhead on top of the 5MB image cap.
const UPLOAD_BODY_LIMIT: usize = posts::MAX_IMAGE_BYTES + 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sparrow=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("SPARROW_JWT_SECRET").unwrap_or_default();
    if !jwt_secret_usable(&jwt_secret) {
        eprintln!("FATAL: SPARROW_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Tokens signed with a known secret are forgeable.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }
    let db_path = std::env::var("SPARROW_DB_PATH").unwrap_or_else(|_| "sparrow.db".into());
    let media_dir: PathBuf = std::env::var("SPARROW_MEDIA_DIR")
        .unwrap_or_else(|_| "./media".into())
        .into();
    let host = std::env::var("SPARROW_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("SPARROW_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    std::fs::create_dir_all(&media_dir)?;

    // Init database
    let db = sparrow_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: dispatcher.clone(),
        jwt_secret,
        media_dir: media_dir.clone(),
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        // Users & follow graph
        .route("/users/me", patch(users::update_me))
        .route("/users/{user}", get(users::get_profile))
        .route(
            "/users/{user}/follow",
            post(users::follow).delete(users::unfollow),
        )
        .route("/users/{user}/posts", get(posts::list_user_posts))
        // Posts
        .route(
            "/posts",
            get(posts::list_feed)
                .post(posts::create_post)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/posts/{post}",
            patch(posts::update_post).delete(posts::delete_post),
        )
        .route("/posts/{post}/visibility", patch(posts::set_visibility))
        .route("/posts/{post}/like", post(posts::toggle_like))
        .route("/posts/{post}/comments", post(posts::add_comment))
        // Conversations & messages
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/with/{user}", get(conversations::find_or_create))
        .route("/conversations/search", get(conversations::search_targets))
        .route(
            "/conversations/{conversation}/messages",
            get(conversations::list_messages).post(conversations::send_message),
        )
        .route(
            "/conversations/messages/{message}",
            delete(conversations::delete_message),
        )
        // Notifications
        .route("/notifications", get(notifications::list))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", patch(notifications::mark_all_read))
        .route("/notifications/{notification}/read", patch(notifications::mark_read))
        .route("/notifications/{notification}", delete(notifications::delete))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/media", ServeDir::new(&media_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Sparrow server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, jwt_secret))
}

#[cfg(test)]
mod tests {
    use super::jwt_secret_usable;

    #[test]
    fn placeholder_secrets_are_rejected() {
        assert!(!jwt_secret_usable(""));
        assert!(!jwt_secret_usable("dev-secret-change-me"));
        assert!(!jwt_secret_usable("change-me-to-a-random-string"));
        assert!(jwt_secret_usable("0f8e2a6d4c1b3e5f7a9d0c2b4e6f8a1c"));
    }
}
