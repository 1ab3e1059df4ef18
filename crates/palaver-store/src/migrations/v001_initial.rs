//! v001 -- Initial schema creation.
//!
//! Creates the three core collections: `users`, `conversations` and
//! `messages`.  There are deliberately no foreign keys: the cache is a
//! partial mirror and a message may be observed before its conversation.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id        TEXT PRIMARY KEY NOT NULL,
    fullname  TEXT NOT NULL,
    username  TEXT NOT NULL,
    gender    TEXT NOT NULL DEFAULT '',
    image     TEXT,
    phone     TEXT
);

CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,
    title           TEXT NOT NULL DEFAULT '',
    is_group        INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    participants    TEXT NOT NULL DEFAULT '[]',   -- JSON array of user ids
    last_message    TEXT,
    last_message_at TEXT,                         -- RFC-3339, UTC, micros
    creator_id      TEXT
);

CREATE INDEX IF NOT EXISTS idx_conversations_last_message_at
    ON conversations(last_message_at);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,
    conversation_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    message         TEXT NOT NULL,
    created_at      TEXT NOT NULL,                -- RFC-3339, UTC, micros
    read_by         TEXT NOT NULL DEFAULT '[]'    -- JSON array of user ids
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
