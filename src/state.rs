use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::backend::SqliteBackend;
use crate::services::conversation::FrontDesk;

pub struct AppState {
    pub config: AppConfig,
    pub desk: FrontDesk,
    /// Same backend the desk books against; admin routes write tenant config through it.
    pub backend: Arc<SqliteBackend>,
}
