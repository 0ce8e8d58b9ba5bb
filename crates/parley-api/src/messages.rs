use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::search::fts_query;
use parley_types::api::{CreatedResponse, SearchHit, SearchParams, SendMessageRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::Message;

use crate::context::AuthContext;
use crate::enrich::{AuthorDirectory, UNKNOWN_CHANNEL, channel_names, message_view};
use crate::error::ApiError;
use crate::state::{AppState, AppStateInner, run_blocking};

/// Maximum number of hits a search returns.
pub const SEARCH_LIMIT: u32 = 20;

pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Every message in a channel, oldest first, with author display info.
/// Anonymous callers get an empty list.
pub fn list(
    state: &AppStateInner,
    ctx: &AuthContext,
    channel_id: Uuid,
) -> Result<Vec<Message>, ApiError> {
    if ctx.user_id().is_none() {
        return Ok(vec![]);
    }

    let rows = state.db.get_messages(&channel_id.to_string())?;
    let authors = AuthorDirectory::load(state, rows.iter().map(|r| r.author_id.as_str()))?;

    Ok(rows
        .into_iter()
        .map(|row| message_view(row, &authors))
        .collect())
}

/// Post a message as the caller. Content is stored trimmed.
pub fn send(
    state: &AppStateInner,
    ctx: &AuthContext,
    channel_id: Uuid,
    content: &str,
) -> Result<Message, ApiError> {
    let user_id = ctx.require()?;

    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::validation("Message cannot be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::validation("Message is too long"));
    }

    let cid = channel_id.to_string();
    if state.db.get_channel(&cid)?.is_none() {
        return Err(ApiError::NotFound("Channel not found".into()));
    }

    let row = state.db.insert_message(
        &Uuid::new_v4().to_string(),
        &cid,
        &user_id.to_string(),
        content,
    )?;

    let authors = AuthorDirectory::load(state, [row.author_id.as_str()])?;
    let message = message_view(row, &authors);

    state.dispatcher.broadcast(GatewayEvent::MessageCreate {
        channel_id,
        message: message.clone(),
    });

    Ok(message)
}

/// Full-text search over message content, best matches first, capped at
/// [`SEARCH_LIMIT`]. Anonymous callers and blank queries get an empty list.
pub fn search(
    state: &AppStateInner,
    ctx: &AuthContext,
    query: &str,
    channel_id: Option<Uuid>,
) -> Result<Vec<SearchHit>, ApiError> {
    if ctx.user_id().is_none() {
        return Ok(vec![]);
    }
    let Some(match_expr) = fts_query(query) else {
        return Ok(vec![]);
    };

    let channel_filter = channel_id.map(|id| id.to_string());
    let rows = state
        .db
        .search_messages(&match_expr, channel_filter.as_deref(), SEARCH_LIMIT)?;

    let authors =
        AuthorDirectory::load(state, rows.iter().map(|r| r.message.author_id.as_str()))?;
    let names = channel_names(state, rows.iter().map(|r| r.message.channel_id.as_str()))?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let channel_name = names
                .get(&row.message.channel_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_CHANNEL.to_string());
            SearchHit {
                message: message_view(row.message, &authors),
                channel_name,
                highlighted: row.highlighted,
            }
        })
        .collect())
}

// -- HTTP --

pub async fn list_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = run_blocking(&state, move |s| list(s, &ctx, channel_id)).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = run_blocking(&state, move |s| send(s, &ctx, channel_id, &req.content)).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: message.id })))
}

pub async fn search_messages(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let hits = run_blocking(&state, move |s| search(s, &ctx, &params.q, params.channel_id)).await?;
    Ok(Json(hits))
}
