pub mod channels;
pub mod context;
pub mod enrich;
pub mod error;
pub mod files;
pub mod messages;
pub mod middleware;
pub mod profiles;
pub mod state;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::middleware::resolve_identity;
use crate::state::AppState;

/// All REST routes. Everything except the file upload/download endpoints
/// runs behind identity resolution; uploads are authorized by their ticket.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/channels", get(channels::list_channels).post(channels::create_channel))
        .route("/channels/{channel_id}", get(channels::get_channel))
        .route(
            "/channels/{channel_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/messages/search", get(messages::search_messages))
        .route("/profile", get(profiles::get_profile).put(profiles::update_profile))
        .route("/files/upload-url", post(files::create_upload_url))
        .layer(from_fn_with_state(state.clone(), resolve_identity))
        .with_state(state.clone());

    let file_routes = Router::new()
        .route("/files/upload", post(files::upload_file))
        .route("/files/{storage_id}", get(files::download_file))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state);

    api_routes.merge(file_routes)
}
