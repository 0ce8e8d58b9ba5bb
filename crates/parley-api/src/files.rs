use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use parley_db::models::FileRow;
use parley_types::api::{UploadParams, UploadResponse, UploadUrlResponse};

use crate::context::AuthContext;
use crate::error::ApiError;
use crate::state::{AppState, AppStateInner, run_blocking};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Issue a signed, time-limited URL the caller can upload a file to.
pub fn generate_upload_url(
    state: &AppStateInner,
    ctx: &AuthContext,
    now: DateTime<Utc>,
) -> Result<UploadUrlResponse, ApiError> {
    let user_id = ctx.require()?;
    let (upload_url, expires_at) = state.files.upload_url(user_id, now);
    Ok(UploadUrlResponse {
        upload_url,
        expires_at,
    })
}

/// Store an uploaded blob authorized by an upload ticket and record it.
/// Returns the storage id that profiles reference as an avatar.
pub async fn store_upload(
    state: &AppState,
    ticket: &str,
    content_type: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<UploadResponse, ApiError> {
    let uploader = state.files.signer.verify(ticket, now).map_err(|e| {
        debug!("Rejected upload ticket: {}", e);
        ApiError::Forbidden("Upload link is invalid or expired".into())
    })?;

    if body.is_empty() {
        return Err(ApiError::validation("Upload is empty"));
    }
    if body.len() > state.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge(state.max_upload_bytes));
    }

    let storage_id = Uuid::new_v4();
    let sid = storage_id.to_string();
    let sha256 = state.files.blobs.write(&sid, body).await?;

    let row = FileRow {
        id: sid.clone(),
        uploader_id: uploader.to_string(),
        content_type: content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string(),
        size: body.len() as i64,
        sha256,
        created_at: now.timestamp_millis(),
    };

    if let Err(e) = run_blocking(state, move |s| Ok(s.db.insert_file(&row)?)).await {
        // Don't leave an orphaned blob behind
        if let Err(cleanup) = state.files.blobs.delete(&sid).await {
            error!("Failed to remove orphaned blob {}: {}", sid, cleanup);
        }
        return Err(e);
    }

    info!("{} uploaded {} ({} bytes)", uploader, storage_id, body.len());
    Ok(UploadResponse {
        storage_id,
        size: body.len() as u64,
    })
}

// -- HTTP --

/// POST /files/upload-url
pub async fn create_upload_url(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(generate_upload_url(&state, &ctx, Utc::now())?))
}

/// POST /files/upload?ticket=... (raw body, content type from the request)
pub async fn upload_file(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let response = store_upload(&state, &params.ticket, content_type, &body, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /files/{storage_id}. Public so avatar URLs can be embedded directly.
pub async fn download_file(
    State(state): State<AppState>,
    Path(storage_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = storage_id.to_string();
    let lookup = sid.clone();
    let file = run_blocking(&state, move |s| Ok(s.db.get_file(&lookup)?))
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".into()))?;

    let bytes = state.files.blobs.read(&sid).await.map_err(|e| {
        error!("Blob {} missing from disk: {}", sid, e);
        ApiError::NotFound("File not found".into())
    })?;

    Ok(([(header::CONTENT_TYPE, file.content_type)], bytes))
}
