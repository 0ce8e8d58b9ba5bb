use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;
use parley_storage::FileStore;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub files: FileStore,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub max_upload_bytes: usize,
}

/// Run a blocking operation (SQLite access) off the async runtime.
pub async fn run_blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow!("blocking task failed"))
        })?
}
