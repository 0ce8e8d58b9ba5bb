use uuid::Uuid;

use crate::error::ApiError;

/// Who is calling. Resolved once per request by the identity middleware and
/// passed explicitly to every operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthContext {
    user_id: Option<Uuid>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    /// The caller's id, or `Unauthenticated` for anonymous callers.
    pub fn require(&self) -> Result<Uuid, ApiError> {
        self.user_id.ok_or(ApiError::Unauthenticated)
    }
}
