use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT,
                email       TEXT,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE files (
                id              TEXT PRIMARY KEY,
                uploader_id     TEXT NOT NULL REFERENCES users(id),
                content_type    TEXT NOT NULL,
                size            INTEGER NOT NULL,
                sha256          TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE profiles (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL UNIQUE REFERENCES users(id),
                name        TEXT NOT NULL,
                avatar_id   TEXT REFERENCES files(id),
                updated_at  INTEGER NOT NULL
            );

            CREATE TABLE channels (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE,
                created_by  TEXT NOT NULL REFERENCES users(id),
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                channel_id  TEXT NOT NULL REFERENCES channels(id),
                author_id   TEXT NOT NULL REFERENCES users(id),
                content     TEXT NOT NULL CHECK (length(trim(content)) > 0),
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_channel
                ON messages(channel_id, created_at);

            -- External-content full-text index over messages.content
            CREATE VIRTUAL TABLE messages_fts USING fts5(
                content,
                content = 'messages',
                content_rowid = 'rowid',
                tokenize = 'unicode61'
            );

            CREATE TRIGGER messages_fts_insert AFTER INSERT ON messages BEGIN
                INSERT INTO messages_fts (rowid, content) VALUES (new.rowid, new.content);
            END;

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
