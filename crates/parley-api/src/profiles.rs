use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_types::api::{ProfileResponse, UpdateProfileRequest};
use parley_types::events::GatewayEvent;

use crate::context::AuthContext;
use crate::enrich::AuthorDirectory;
use crate::error::ApiError;
use crate::state::{AppState, AppStateInner, run_blocking};

pub const MAX_NAME_CHARS: usize = 64;

/// Largest file accepted as an avatar (5 MiB).
pub const MAX_AVATAR_BYTES: i64 = 5 * 1024 * 1024;

/// The caller's profile merged with identity fallbacks, or `None` for
/// anonymous callers.
pub fn get(state: &AppStateInner, ctx: &AuthContext) -> Result<Option<ProfileResponse>, ApiError> {
    let Some(user_id) = ctx.user_id() else {
        return Ok(None);
    };

    let uid = user_id.to_string();
    let author = AuthorDirectory::load(state, [uid.as_str()])?.resolve(&uid);
    let email = state.db.get_user(&uid)?.and_then(|u| u.email);

    Ok(Some(ProfileResponse {
        user_id,
        name: author.name,
        avatar_url: author.avatar_url,
        email,
    }))
}

/// Create or patch the caller's profile. The stored avatar only changes when
/// `avatar_id` is given.
pub fn update(
    state: &AppStateInner,
    ctx: &AuthContext,
    name: &str,
    avatar_id: Option<Uuid>,
) -> Result<(), ApiError> {
    let user_id = ctx.require()?;

    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::validation("Name is too long"));
    }
    if let Some(avatar_id) = avatar_id {
        check_avatar(state, user_id, avatar_id)?;
    }

    let uid = user_id.to_string();
    let avatar = avatar_id.map(|id| id.to_string());
    state
        .db
        .upsert_profile(&Uuid::new_v4().to_string(), &uid, name, avatar.as_deref())?;

    let author = AuthorDirectory::load(state, [uid.as_str()])?.resolve(&uid);
    info!("{} updated profile (name: {})", user_id, author.name);

    state.dispatcher.broadcast(GatewayEvent::ProfileUpdate {
        user_id,
        name: author.name,
        avatar_url: author.avatar_url,
    });

    Ok(())
}

/// Avatars must be images of at most [`MAX_AVATAR_BYTES`] uploaded by the caller.
fn check_avatar(state: &AppStateInner, user_id: Uuid, avatar_id: Uuid) -> Result<(), ApiError> {
    let file = state
        .db
        .get_file(&avatar_id.to_string())?
        .ok_or_else(|| ApiError::validation("Avatar file not found"))?;

    if file.uploader_id != user_id.to_string() {
        return Err(ApiError::Forbidden("Avatar was uploaded by another user".into()));
    }

    if !file.content_type.starts_with("image/") {
        return Err(ApiError::validation("Avatar must be an image"));
    }
    if file.size > MAX_AVATAR_BYTES {
        return Err(ApiError::validation("Avatar must be 5MB or smaller"));
    }
    Ok(())
}

// -- HTTP --

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_blocking(&state, move |s| get(s, &ctx)).await?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(&state, move |s| update(s, &ctx, &req.name, req.avatar_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn profile_rows(state: &AppStateInner, user_id: Uuid) -> i64 {
        state
            .db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM profiles WHERE user_id = ?1",
                    [user_id.to_string()],
                    |r| r.get(0),
                )?)
            })
            .unwrap()
    }

    #[tokio::test]
    async fn anonymous_get_is_none() {
        let state = testing::state().await;
        assert!(get(&state, &AuthContext::anonymous()).unwrap().is_none());
    }

    #[tokio::test]
    async fn get_falls_back_to_identity() {
        let state = testing::state().await;
        let (user_id, ctx) = testing::user(&state, None, Some("ada@example.com"));

        let profile = get(&state, &ctx).unwrap().unwrap();
        assert_eq!(profile.user_id, user_id);
        assert_eq!(profile.name, "ada@example.com");
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
        assert_eq!(profile.avatar_url, None);
    }

    #[tokio::test]
    async fn repeated_updates_keep_one_row_with_latest_name() {
        let state = testing::state().await;
        let (user_id, ctx) = testing::user(&state, Some("ada"), None);

        update(&state, &ctx, "First", None).unwrap();
        update(&state, &ctx, "Second", None).unwrap();

        assert_eq!(profile_rows(&state, user_id), 1);
        assert_eq!(get(&state, &ctx).unwrap().unwrap().name, "Second");
    }

    #[tokio::test]
    async fn update_without_avatar_keeps_stored_avatar() {
        let state = testing::state().await;
        let (user_id, ctx) = testing::user(&state, None, None);
        let avatar = testing::file(&state, user_id, "image/png", 1024);

        update(&state, &ctx, "Ada", Some(avatar)).unwrap();
        update(&state, &ctx, "Ada Lovelace", None).unwrap();

        let profile = get(&state, &ctx).unwrap().unwrap();
        assert_eq!(profile.name, "Ada Lovelace");
        assert_eq!(
            profile.avatar_url,
            Some(state.files.object_url(&avatar.to_string()))
        );
    }

    #[tokio::test]
    async fn update_validates_input() {
        let state = testing::state().await;
        let (user_id, ctx) = testing::user(&state, None, None);
        let document = testing::file(&state, user_id, "application/pdf", 10);
        let huge = testing::file(&state, user_id, "image/png", MAX_AVATAR_BYTES + 1);

        assert!(matches!(
            update(&state, &AuthContext::anonymous(), "Ada", None),
            Err(ApiError::Unauthenticated)
        ));
        assert!(matches!(update(&state, &ctx, "  ", None), Err(ApiError::Validation(_))));
        assert!(matches!(
            update(&state, &ctx, &"n".repeat(MAX_NAME_CHARS + 1), None),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            update(&state, &ctx, "Ada", Some(Uuid::new_v4())),
            Err(ApiError::Validation(ref m)) if m == "Avatar file not found"
        ));
        assert!(matches!(
            update(&state, &ctx, "Ada", Some(document)),
            Err(ApiError::Validation(ref m)) if m == "Avatar must be an image"
        ));
        assert!(matches!(
            update(&state, &ctx, "Ada", Some(huge)),
            Err(ApiError::Validation(_))
        ));
        assert_eq!(profile_rows(&state, user_id), 0);
    }

    #[tokio::test]
    async fn avatar_must_be_uploaded_by_the_caller() {
        let state = testing::state().await;
        let (owner_id, owner) = testing::user(&state, Some("owner"), None);
        let (_, other) = testing::user(&state, Some("other"), None);
        let avatar = testing::file(&state, owner_id, "image/png", 1024);

        assert!(matches!(
            update(&state, &other, "Thief", Some(avatar)),
            Err(ApiError::Forbidden(_))
        ));
        assert!(get(&state, &other).unwrap().unwrap().avatar_url.is_none());

        update(&state, &owner, "Owner", Some(avatar)).unwrap();
        assert_eq!(
            get(&state, &owner).unwrap().unwrap().avatar_url,
            Some(state.files.object_url(&avatar.to_string()))
        );
    }

    #[tokio::test]
    async fn update_announces_the_new_name() {
        let state = testing::state().await;
        let (user_id, ctx) = testing::user(&state, None, None);
        let mut events = state.dispatcher.subscribe();

        update(&state, &ctx, "  Grace  ", None).unwrap();

        match events.recv().await.unwrap() {
            GatewayEvent::ProfileUpdate { user_id: id, name, .. } => {
                assert_eq!(id, user_id);
                assert_eq!(name, "Grace");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
