pub mod auth;
pub mod conversations;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod users;
pub mod views;

use std::path::PathBuf;
use std::sync::Arc;

use sparrow_db::Database;
use sparrow_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
}
