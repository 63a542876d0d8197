use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            display_name  TEXT,
            created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            role        TEXT NOT NULL DEFAULT 'member',
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            channel_id      TEXT NOT NULL REFERENCES channels(id),
            author_id       TEXT NOT NULL,
            content         TEXT NOT NULL,
            reply_to_id     TEXT REFERENCES messages(id),
            attachments     TEXT NOT NULL DEFAULT '[]',
            edited          INTEGER NOT NULL DEFAULT 0,
            client_nonce    TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            deleted_at      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at, id);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
