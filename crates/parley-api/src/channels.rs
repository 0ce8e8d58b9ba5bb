use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_db::is_unique_violation;
use parley_types::api::{CreateChannelRequest, CreatedResponse};
use parley_types::events::GatewayEvent;
use parley_types::models::Channel;

use crate::context::AuthContext;
use crate::enrich::channel_view;
use crate::error::ApiError;
use crate::state::{AppState, AppStateInner, run_blocking};

pub const MAX_CHANNEL_NAME_CHARS: usize = 80;

/// All channels, oldest first. Anonymous callers get an empty list.
pub fn list(state: &AppStateInner, ctx: &AuthContext) -> Result<Vec<Channel>, ApiError> {
    if ctx.user_id().is_none() {
        return Ok(vec![]);
    }

    Ok(state
        .db
        .list_channels()?
        .into_iter()
        .map(channel_view)
        .collect())
}

pub fn get(
    state: &AppStateInner,
    ctx: &AuthContext,
    channel_id: Uuid,
) -> Result<Option<Channel>, ApiError> {
    if ctx.user_id().is_none() {
        return Ok(None);
    }

    Ok(state.db.get_channel(&channel_id.to_string())?.map(channel_view))
}

pub fn create(state: &AppStateInner, ctx: &AuthContext, name: &str) -> Result<Channel, ApiError> {
    let user_id = ctx.require()?;

    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Channel name cannot be empty"));
    }
    if name.chars().count() > MAX_CHANNEL_NAME_CHARS {
        return Err(ApiError::validation("Channel name is too long"));
    }

    let row = state
        .db
        .insert_channel(&Uuid::new_v4().to_string(), name, &user_id.to_string())
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict("Channel already exists".into())
            } else {
                ApiError::Internal(e)
            }
        })?;

    let channel = channel_view(row);
    info!("{} created channel #{} ({})", user_id, channel.name, channel.id);

    state.dispatcher.broadcast(GatewayEvent::ChannelCreate {
        channel: channel.clone(),
    });

    Ok(channel)
}

// -- HTTP --

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let channels = run_blocking(&state, move |s| list(s, &ctx)).await?;
    Ok(Json(channels))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = run_blocking(&state, move |s| get(s, &ctx, channel_id)).await?;
    Ok(Json(channel))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = run_blocking(&state, move |s| create(s, &ctx, &req.name)).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: channel.id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn anonymous_reads_are_empty() {
        let state = testing::state().await;
        let (_, alice) = testing::user(&state, Some("alice"), None);
        let channel = create(&state, &alice, "general").unwrap();

        let anon = AuthContext::anonymous();
        assert!(list(&state, &anon).unwrap().is_empty());
        assert!(get(&state, &anon, channel.id).unwrap().is_none());

        assert_eq!(list(&state, &alice).unwrap(), vec![channel.clone()]);
        assert_eq!(get(&state, &alice, channel.id).unwrap(), Some(channel));
    }

    #[tokio::test]
    async fn create_validates_and_rejects_duplicates() {
        let state = testing::state().await;
        let (_, alice) = testing::user(&state, None, None);

        assert!(matches!(
            create(&state, &AuthContext::anonymous(), "general"),
            Err(ApiError::Unauthenticated)
        ));
        assert!(matches!(
            create(&state, &alice, "   "),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            create(&state, &alice, &"x".repeat(MAX_CHANNEL_NAME_CHARS + 1)),
            Err(ApiError::Validation(_))
        ));

        let channel = create(&state, &alice, "  general ").unwrap();
        assert_eq!(channel.name, "general");
        assert!(matches!(
            create(&state, &alice, "general"),
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn create_announces_the_channel() {
        let state = testing::state().await;
        let (_, alice) = testing::user(&state, None, None);
        let mut events = state.dispatcher.subscribe();

        let channel = create(&state, &alice, "random").unwrap();

        match events.recv().await.unwrap() {
            GatewayEvent::ChannelCreate { channel: announced } => assert_eq!(announced, channel),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
