//! v002 -- Label catalog and conversation/label associations.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS labels (
    id    TEXT PRIMARY KEY NOT NULL,
    name  TEXT NOT NULL,
    color TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS conversation_labels (
    id              TEXT PRIMARY KEY NOT NULL,
    conversation_id TEXT NOT NULL,
    label_id        TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_conversation_labels_pair
    ON conversation_labels(conversation_id, label_id);
CREATE INDEX IF NOT EXISTS idx_conversation_labels_conversation
    ON conversation_labels(conversation_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
