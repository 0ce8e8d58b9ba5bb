//! Database row types. These map directly to SQLite rows.
//! Distinct from parley-types API models to keep the DB layer independent.
//! Timestamps are Unix milliseconds.
pub struct UserRow {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub created_at: i64,
}

pub struct ProfileRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub avatar_id: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug)]
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
}

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: i64,
}

/// A full-text search hit, in index rank order.
pub struct SearchRow {
    pub message: MessageRow,
    pub highlighted: String,
}

pub struct FileRow {
    pub id: String,
    pub uploader_id: String,
    pub content_type: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: i64,
}

/// Everything needed to resolve a user's display name and avatar.
/// `avatar_id` is only set when the referenced file row still exists.
pub struct AuthorRow {
    pub user_id: String,
    pub profile_name: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub avatar_id: Option<String>,
}
