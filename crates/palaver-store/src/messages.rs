//! The `messages` collection.
//!
//! Messages are append-only. Apart from whole-record `put`, the only
//! mutation offered here is growing `read_by`, which is a set union and
//! therefore safe to repeat or race.

use std::collections::BTreeSet;

use rusqlite::types::Value;
use rusqlite::{params, Connection, Row};

use palaver_shared::timestamp::to_storage_string;
use palaver_shared::{ConversationId, Message, MessageId, UserId};

use crate::error::Result;
use crate::repository::{
    json_column, query_records, select_by_key, text, timestamp_column, upsert, Collection, Record,
};

/// Secondary indexes on `messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIndex {
    ConversationId,
    CreatedAt,
}

impl Record for Message {
    type Index = MessageIndex;

    const TABLE: &'static str = "messages";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "conversation_id",
        "sender_id",
        "message",
        "created_at",
        "read_by",
    ];

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn index_column(index: MessageIndex) -> &'static str {
        match index {
            MessageIndex::ConversationId => "conversation_id",
            MessageIndex::CreatedAt => "created_at",
        }
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(self.key()),
            text(self.conversation_id.as_str()),
            text(self.sender_id.as_str()),
            text(self.message.as_str()),
            text(to_storage_string(&self.created_at)),
            text(serde_json::to_string(&self.read_by)?),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        let conversation_id: String = row.get(1)?;
        let sender_id: String = row.get(2)?;
        let read_by: BTreeSet<UserId> = json_column(row, 5)?;

        Ok(Message {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            message: row.get(3)?,
            created_at: timestamp_column(row, 4)?,
            read_by,
        })
    }
}

impl Collection<Message> {
    /// Insert `message` only if no message with its id is stored yet.
    ///
    /// Returns `true` when the message was inserted, `false` when the id was
    /// already present (the stored copy is left untouched).
    pub async fn insert_new(&self, message: Message) -> Result<bool> {
        self.store
            .with_conn(move |conn| {
                let values = message.to_values()?;
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO messages
                         (id, conversation_id, sender_id, message, created_at, read_by)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params_from_iter(values),
                )?;
                Ok(inserted == 1)
            })
            .await
    }

    /// Add `reader` to the message's `read_by` set.
    ///
    /// Returns the updated message, or `None` when the message is not
    /// cached. Adding a reader that is already present writes nothing.
    pub async fn add_reader(&self, id: &MessageId, reader: &UserId) -> Result<Option<Message>> {
        let id = id.to_string();
        let reader = reader.clone();
        self.store
            .with_conn(move |conn| {
                let Some(mut message) = select_by_key::<Message>(conn, &id)? else {
                    return Ok(None);
                };
                if message.mark_read_by(&reader) {
                    write_read_by(conn, &message)?;
                }
                Ok(Some(message))
            })
            .await
    }

    /// Store a batch of messages, unioning `read_by` with any copy already
    /// cached so that no reader recorded locally is ever dropped. One
    /// transaction for the whole batch.
    pub async fn merge_all(&self, messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        self.store
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                for mut message in messages {
                    if let Some(stored) = select_by_key::<Message>(&tx, message.id.as_str())? {
                        message.read_by.extend(stored.read_by);
                    }
                    upsert(&tx, &message)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Messages of one conversation in chronological order.
    pub async fn for_conversation(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        self.store
            .with_conn(move |conn| {
                query_records::<Message, _>(
                    conn,
                    "SELECT id, conversation_id, sender_id, message, created_at, read_by
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at ASC, id ASC",
                    params![conversation_id],
                )
            })
            .await
    }
}

fn write_read_by(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "UPDATE messages SET read_by = ?1 WHERE id = ?2",
        params![serde_json::to_string(&message.read_by)?, message.id.as_str()],
    )?;
    Ok(())
}
