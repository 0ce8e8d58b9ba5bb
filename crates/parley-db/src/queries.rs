use crate::models::{
    AuthorRow, ChannelRow, FileRow, MessageRow, ProfileRow, SearchRow, UserRow,
};
use crate::{Database, now_millis};
use anyhow::Result;
use rusqlite::{Connection, Row, ToSql};

/// Ids bound per `IN (...)` query. SQLite caps the number of host parameters
/// in one statement, so larger batches are split.
pub const MAX_BATCH_IDS: usize = 500;

impl Database {
    // -- Users --

    /// Mirror an identity record from the auth provider. Only writes when the
    /// stored name or email differ from what the provider reports.
    pub fn upsert_user(&self, id: &str, name: Option<&str>, email: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email
                 WHERE users.name IS NOT excluded.name OR users.email IS NOT excluded.email",
                rusqlite::params![id, name, email, now_millis()],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, email, created_at FROM users WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(UserRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            email: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Profiles --

    pub fn get_profile_by_user(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, name, avatar_id, updated_at FROM profiles WHERE user_id = ?1",
                    [user_id],
                    |row| {
                        Ok(ProfileRow {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            name: row.get(2)?,
                            avatar_id: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Insert the user's profile, or patch it if one exists.
    /// `avatar_id = None` leaves a stored avatar untouched.
    /// `id` is only used when a new row is inserted.
    pub fn upsert_profile(
        &self,
        id: &str,
        user_id: &str,
        name: &str,
        avatar_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, user_id, name, avatar_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    name = excluded.name,
                    avatar_id = COALESCE(excluded.avatar_id, profiles.avatar_id),
                    updated_at = excluded.updated_at",
                rusqlite::params![id, user_id, name, avatar_id, now_millis()],
            )?;
            Ok(())
        })
    }

    /// Batch-resolve display information for a set of user IDs.
    /// Users without a row are absent from the result.
    pub fn get_authors(&self, user_ids: &[String]) -> Result<Vec<AuthorRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let mut rows = Vec::with_capacity(user_ids.len());
            for chunk in user_ids.chunks(MAX_BATCH_IDS) {
                let sql = format!(
                    "SELECT u.id, p.name, u.name, u.email, f.id
                     FROM users u
                     LEFT JOIN profiles p ON p.user_id = u.id
                     LEFT JOIN files f ON f.id = p.avatar_id
                     WHERE u.id IN ({})",
                    placeholders(chunk.len())
                );

                let mut stmt = conn.prepare_cached(&sql)?;
                let batch = stmt.query_map(as_params(chunk).as_slice(), |row| {
                    Ok(AuthorRow {
                        user_id: row.get(0)?,
                        profile_name: row.get(1)?,
                        user_name: row.get(2)?,
                        user_email: row.get(3)?,
                        avatar_id: row.get(4)?,
                    })
                })?;
                for row in batch {
                    rows.push(row?);
                }
            }
            Ok(rows)
        })
    }

    // -- Channels --

    pub fn insert_channel(&self, id: &str, name: &str, created_by: &str) -> Result<ChannelRow> {
        let created_at = now_millis();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO channels (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, name, created_by, created_at],
            )?;
            Ok(())
        })?;

        Ok(ChannelRow {
            id: id.to_string(),
            name: name.to_string(),
            created_by: created_by.to_string(),
            created_at,
        })
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, created_by, created_at FROM channels WHERE id = ?1",
                    [id],
                    channel_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, created_by, created_at FROM channels
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch channels by ID. Unknown IDs are absent from the result.
    pub fn get_channels(&self, ids: &[String]) -> Result<Vec<ChannelRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let mut rows = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(MAX_BATCH_IDS) {
                let sql = format!(
                    "SELECT id, name, created_by, created_at FROM channels WHERE id IN ({})",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                for row in stmt.query_map(as_params(chunk).as_slice(), channel_from_row)? {
                    rows.push(row?);
                }
            }
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        channel_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<MessageRow> {
        let created_at = now_millis();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, channel_id, author_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, channel_id, author_id, content, created_at],
            )?;
            Ok(())
        })?;

        Ok(MessageRow {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            author_id: author_id.to_string(),
            content: content.to_string(),
            created_at,
        })
    }

    /// All messages of a channel, oldest first. Messages stamped in the same
    /// millisecond keep their insertion order.
    pub fn get_messages(&self, channel_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, channel_id, author_id, content, created_at
                 FROM messages
                 WHERE channel_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([channel_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Full-text search over message content, best matches first.
    /// `match_expr` must be a valid FTS5 expression (see [`crate::search::fts_query`]).
    pub fn search_messages(
        &self,
        match_expr: &str,
        channel_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SearchRow>> {
        self.with_conn(|conn| query_search(conn, match_expr, channel_id, limit))
    }

    // -- Files --

    pub fn insert_file(&self, file: &FileRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO files (id, uploader_id, content_type, size, sha256, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    &file.id,
                    &file.uploader_id,
                    &file.content_type,
                    file.size,
                    &file.sha256,
                    file.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, uploader_id, content_type, size, sha256, created_at
                     FROM files WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(FileRow {
                            id: row.get(0)?,
                            uploader_id: row.get(1)?,
                            content_type: row.get(2)?,
                            size: row.get(3)?,
                            sha256: row.get(4)?,
                            created_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

fn query_search(
    conn: &Connection,
    match_expr: &str,
    channel_id: Option<&str>,
    limit: u32,
) -> Result<Vec<SearchRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.channel_id, m.author_id, m.content, m.created_at,
                highlight(messages_fts, 0, '<mark>', '</mark>')
         FROM messages_fts
         JOIN messages m ON m.rowid = messages_fts.rowid
         WHERE messages_fts MATCH ?1
           AND (?2 IS NULL OR m.channel_id = ?2)
         ORDER BY messages_fts.rank
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![match_expr, channel_id, limit], |row| {
            Ok(SearchRow {
                message: message_from_row(row)?,
                highlighted: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_by: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        author_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn as_params(ids: &[String]) -> Vec<&dyn ToSql> {
    ids.iter().map(|id| id as &dyn ToSql).collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_unique_violation;
    use crate::search::fts_query;
    use uuid::Uuid;

    fn id() -> String {
        Uuid::new_v4().to_string()
    }

    fn seed_user(db: &Database, name: Option<&str>, email: Option<&str>) -> String {
        let user_id = id();
        db.upsert_user(&user_id, name, email).unwrap();
        user_id
    }

    fn seed_file(db: &Database, uploader: &str) -> String {
        let file_id = id();
        db.insert_file(&FileRow {
            id: file_id.clone(),
            uploader_id: uploader.to_string(),
            content_type: "image/png".into(),
            size: 3,
            sha256: "00".into(),
            created_at: 0,
        })
        .unwrap();
        file_id
    }

    fn profile_count(db: &Database, user_id: &str) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM profiles WHERE user_id = ?1",
                [user_id],
                |r| r.get(0),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn upsert_user_refreshes_identity_fields() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, Some("Ada"), None);

        db.upsert_user(&user_id, Some("Ada L."), Some("ada@example.com"))
            .unwrap();

        let user = db.get_user(&user_id).unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("Ada L."));
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert!(db.get_user(&id()).unwrap().is_none());
    }

    #[test]
    fn profile_upsert_keeps_one_row_and_preserves_avatar() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, None, None);
        let avatar = seed_file(&db, &user_id);

        db.upsert_profile(&id(), &user_id, "first", Some(&avatar))
            .unwrap();
        db.upsert_profile(&id(), &user_id, "second", None).unwrap();

        assert_eq!(profile_count(&db, &user_id), 1);
        let profile = db.get_profile_by_user(&user_id).unwrap().unwrap();
        assert_eq!(profile.name, "second");
        assert_eq!(profile.avatar_id.as_deref(), Some(avatar.as_str()));
    }

    #[test]
    fn authors_are_resolved_in_one_batch() {
        let db = Database::open_in_memory().unwrap();
        let with_profile = seed_user(&db, Some("user name"), None);
        let bare = seed_user(&db, None, Some("bare@example.com"));
        let avatar = seed_file(&db, &with_profile);
        db.upsert_profile(&id(), &with_profile, "Profile", Some(&avatar))
            .unwrap();

        let mut rows = db
            .get_authors(&[with_profile.clone(), bare.clone(), id()])
            .unwrap();
        rows.sort_by_key(|r| r.user_id != with_profile);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].profile_name.as_deref(), Some("Profile"));
        assert_eq!(rows[0].avatar_id.as_deref(), Some(avatar.as_str()));
        assert_eq!(rows[1].profile_name, None);
        assert_eq!(rows[1].user_email.as_deref(), Some("bare@example.com"));
        assert!(db.get_authors(&[]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_channel_name_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, None, None);
        db.insert_channel(&id(), "general", &user_id).unwrap();

        let err = db.insert_channel(&id(), "general", &user_id).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn messages_are_listed_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, None, None);
        let channel = db.insert_channel(&id(), "general", &user_id).unwrap();
        let other = db.insert_channel(&id(), "random", &user_id).unwrap();

        for i in 0..5 {
            db.insert_message(&id(), &channel.id, &user_id, &format!("msg {}", i))
                .unwrap();
        }
        db.insert_message(&id(), &other.id, &user_id, "elsewhere")
            .unwrap();

        let rows = db.get_messages(&channel.id).unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        let contents: Vec<&str> = rows.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, ["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn blank_content_is_rejected_by_the_schema() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, None, None);
        let channel = db.insert_channel(&id(), "general", &user_id).unwrap();

        assert!(db.insert_message(&id(), &channel.id, &user_id, "   ").is_err());
        assert!(db.get_messages(&channel.id).unwrap().is_empty());
    }

    #[test]
    fn search_matches_prefixes_filters_by_channel_and_highlights() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, None, None);
        let general = db.insert_channel(&id(), "general", &user_id).unwrap();
        let random = db.insert_channel(&id(), "random", &user_id).unwrap();

        db.insert_message(&id(), &general.id, &user_id, "hello world")
            .unwrap();
        db.insert_message(&id(), &random.id, &user_id, "Hello again")
            .unwrap();
        db.insert_message(&id(), &random.id, &user_id, "unrelated")
            .unwrap();

        let expr = fts_query("hel").unwrap();
        let all = db.search_messages(&expr, None, 20).unwrap();
        assert_eq!(all.len(), 2);

        let expr = fts_query("hello").unwrap();
        let scoped = db.search_messages(&expr, Some(&general.id), 20).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].message.content, "hello world");
        assert_eq!(scoped[0].highlighted, "<mark>hello</mark> world");

        let capped = db.search_messages(&expr, None, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn author_lookup_spans_several_batches() {
        let db = Database::open_in_memory().unwrap();
        let ids: Vec<String> = (0..MAX_BATCH_IDS * 2 + 7)
            .map(|i| seed_user(&db, Some(format!("user {}", i).as_str()), None))
            .collect();

        let rows = db.get_authors(&ids).unwrap();
        assert_eq!(rows.len(), ids.len());
        let last = rows.iter().find(|r| r.user_id == ids[ids.len() - 1]).unwrap();
        assert_eq!(
            last.user_name.as_deref(),
            Some(format!("user {}", ids.len() - 1).as_str())
        );
    }

    #[test]
    fn channel_lookup_spans_several_batches() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, None, None);
        let mut ids: Vec<String> = (0..MAX_BATCH_IDS + 3)
            .map(|i| db.insert_channel(&id(), &format!("c{}", i), &user_id).unwrap().id)
            .collect();
        ids.push(id());

        assert_eq!(db.get_channels(&ids).unwrap().len(), MAX_BATCH_IDS + 3);
    }

    #[test]
    fn batch_channel_lookup_skips_unknown_ids() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, None, None);
        let general = db.insert_channel(&id(), "general", &user_id).unwrap();

        let rows = db.get_channels(&[general.id.clone(), id()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "general");
        assert_eq!(db.list_channels().unwrap().len(), 1);
        assert!(db.get_channel(&id()).unwrap().is_none());
    }
}
