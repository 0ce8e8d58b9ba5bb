use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use parley_types::api::Claims;

use crate::context::AuthContext;
use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

/// Resolve the caller from `Authorization: Bearer <jwt>` and attach an
/// [`AuthContext`] to the request. Missing or invalid tokens produce an
/// anonymous context; each operation decides what anonymous callers get.
///
/// A valid token also refreshes the mirrored identity record (name, email).
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .and_then(|auth| verify_token(auth.token(), &state.jwt_secret));

    let ctx = match claims {
        Some(claims) => {
            let user_id = claims.sub;
            run_blocking(&state, move |s| {
                s.db.upsert_user(
                    &claims.sub.to_string(),
                    claims.name.as_deref(),
                    claims.email.as_deref(),
                )?;
                Ok(())
            })
            .await?;
            AuthContext::user(user_id)
        }
        None => AuthContext::anonymous(),
    };

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Validate an HS256 token from the identity provider.
pub fn verify_token(token: &str, secret: &str) -> Option<Claims> {
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            debug!("Rejected bearer token: {}", e);
            None
        }
    }
}
