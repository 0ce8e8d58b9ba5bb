use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_db::models::{AuthorRow, ChannelRow, MessageRow};
use parley_types::models::{Author, Channel, Message};

use crate::error::ApiError;
use crate::state::AppStateInner;

pub const UNKNOWN_AUTHOR: &str = "Unknown";
pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";

/// Pick the first non-empty of profile name, identity name and identity email.
pub fn display_name(
    profile_name: Option<&str>,
    user_name: Option<&str>,
    user_email: Option<&str>,
) -> String {
    [profile_name, user_name, user_email]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string()
}

/// Author display information for a batch of users, fetched in one query.
pub struct AuthorDirectory {
    authors: HashMap<String, Author>,
}

impl AuthorDirectory {
    pub fn load<'a>(
        state: &AppStateInner,
        user_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ApiError> {
        let ids = distinct(user_ids);
        let rows = state.db.get_authors(&ids)?;

        let authors = rows
            .into_iter()
            .map(|row| {
                let author = author_from_row(&row, |id| state.files.object_url(id));
                (row.user_id, author)
            })
            .collect();

        Ok(Self { authors })
    }

    /// Display information for `user_id`; unknown users resolve to "Unknown".
    pub fn resolve(&self, user_id: &str) -> Author {
        self.authors.get(user_id).cloned().unwrap_or_else(|| Author {
            name: UNKNOWN_AUTHOR.to_string(),
            avatar_url: None,
        })
    }
}

fn author_from_row(row: &AuthorRow, object_url: impl Fn(&str) -> String) -> Author {
    Author {
        name: display_name(
            row.profile_name.as_deref(),
            row.user_name.as_deref(),
            row.user_email.as_deref(),
        ),
        avatar_url: row.avatar_id.as_deref().map(object_url),
    }
}

/// Channel names for a batch of channel ids, fetched in one query.
pub fn channel_names<'a>(
    state: &AppStateInner,
    channel_ids: impl IntoIterator<Item = &'a str>,
) -> Result<HashMap<String, String>, ApiError> {
    let ids = distinct(channel_ids);
    Ok(state
        .db
        .get_channels(&ids)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect())
}

/// Unique ids in first-seen order.
fn distinct<'a>(ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

pub fn message_view(row: MessageRow, authors: &AuthorDirectory) -> Message {
    Message {
        id: parse_id(&row.id, "message id"),
        channel_id: parse_id(&row.channel_id, "channel_id"),
        author: authors.resolve(&row.author_id),
        author_id: parse_id(&row.author_id, "author_id"),
        content: row.content,
        created_at: timestamp(row.created_at),
    }
}

pub fn channel_view(row: ChannelRow) -> Channel {
    Channel {
        id: parse_id(&row.id, "channel id"),
        name: row.name,
        created_by: parse_id(&row.created_by, "created_by"),
        created_at: timestamp(row.created_at),
    }
}

fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::nil()
    })
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(|| {
        warn!("Out of range timestamp {}", millis);
        DateTime::default()
    })
}
