//! The `conversations` collection.

use rusqlite::types::Value;
use rusqlite::Row;

use palaver_shared::timestamp::to_storage_string;
use palaver_shared::{Conversation, ConversationId, Message, UserId};

use crate::error::Result;
use crate::repository::{
    json_column, opt_text, opt_timestamp_column, query_records, select_by_key, text, upsert,
    Collection, Record,
};

/// Secondary indexes on `conversations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationIndex {
    LastMessageAt,
}

impl Record for Conversation {
    type Index = ConversationIndex;

    const TABLE: &'static str = "conversations";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "title",
        "is_group",
        "participants",
        "last_message",
        "last_message_at",
        "creator_id",
    ];

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn index_column(index: ConversationIndex) -> &'static str {
        match index {
            ConversationIndex::LastMessageAt => "last_message_at",
        }
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(self.key()),
            text(self.title.as_str()),
            Value::Integer(self.is_group as i64),
            text(serde_json::to_string(&self.participants)?),
            opt_text(self.last_message.as_deref()),
            opt_text(self.last_message_at.as_ref().map(to_storage_string)),
            opt_text(self.creator_id.as_ref().map(|id| id.to_string())),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        let is_group: i64 = row.get(2)?;
        let participants: Vec<UserId> = json_column(row, 3)?;
        let last_message_at = opt_timestamp_column(row, 5)?;
        let creator_id: Option<String> = row.get(6)?;

        Ok(Conversation {
            id: id.into(),
            title: row.get(1)?,
            is_group: is_group != 0,
            participants,
            last_message: row.get(4)?,
            last_message_at,
            creator_id: creator_id.map(UserId::from),
        })
    }
}

impl Collection<Conversation> {
    /// Fold `message` into its conversation's cached preview.
    ///
    /// The preview only moves forward in time: a message older than the
    /// cached `last_message_at` leaves it untouched. Read and write happen
    /// under one lock, so the update is atomic for the record. Returns
    /// whether the conversation was found and updated.
    pub async fn apply_last_message(&self, message: &Message) -> Result<bool> {
        let message = message.clone();
        self.store
            .with_conn(move |conn| {
                let Some(mut conversation) =
                    select_by_key::<Conversation>(conn, message.conversation_id.as_str())?
                else {
                    return Ok(false);
                };

                if !conversation.apply_message(&message) {
                    return Ok(false);
                }
                upsert(conn, &conversation)?;
                Ok(true)
            })
            .await
    }

    /// Store fresh remote copies of conversations.
    ///
    /// A cached preview strictly newer than the remote one is kept, so an
    /// observed message is never rolled back. Each stored copy is read,
    /// merged and written in one transaction under the connection lock;
    /// a concurrent [`apply_last_message`](Self::apply_last_message) lands
    /// either before or after the whole batch.
    pub async fn merge_remote(&self, conversations: Vec<Conversation>) -> Result<()> {
        if conversations.is_empty() {
            return Ok(());
        }

        let count = conversations.len();
        self.store
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                for mut remote in conversations {
                    if let Some(local) = select_by_key::<Conversation>(&tx, remote.id.as_str())? {
                        remote.keep_newer_preview(&local);
                    }
                    upsert(&tx, &remote)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::debug!(count, "remote conversations merged");
        Ok(())
    }

    /// Conversations the given user takes part in, newest preview first.
    pub async fn for_participant(&self, user: &UserId) -> Result<Vec<Conversation>> {
        let user = user.clone();
        let mut conversations: Vec<Conversation> = self
            .store
            .with_conn(|conn| {
                query_records::<Conversation, _>(
                    conn,
                    "SELECT id, title, is_group, participants, last_message, last_message_at, creator_id
                     FROM conversations
                     ORDER BY last_message_at DESC",
                    [],
                )
            })
            .await?;
        conversations.retain(|c| c.has_participant(&user));
        Ok(conversations)
    }

    /// Cheap existence check used before rendering from cache.
    pub async fn contains(&self, id: &ConversationId) -> Result<bool> {
        let id = id.to_string();
        self.store
            .with_conn(move |conn| Ok(select_by_key::<Conversation>(conn, &id)?.is_some()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{LocalStore, Repository};

    fn at(h: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, h, 0, 0).unwrap()
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            title: "Chat".into(),
            is_group: false,
            participants: vec!["u1".into(), "u2".into()],
            last_message: Some("hi".into()),
            last_message_at: Some(at(9)),
            creator_id: Some("u1".into()),
        }
    }

    #[tokio::test]
    async fn round_trips_all_fields() {
        let store = LocalStore::in_memory();
        store.conversations().put(conversation("c1")).await.unwrap();

        let loaded = store.conversations().get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(loaded, conversation("c1"));
    }

    #[tokio::test]
    async fn apply_last_message_is_monotonic() {
        let store = LocalStore::in_memory();
        let conversations = store.conversations();
        conversations.put(conversation("c1")).await.unwrap();

        let newer = Message::compose("c1".into(), "u2".into(), "newer", at(11));
        let stale = Message::compose("c1".into(), "u1".into(), "backfill", at(7));

        assert!(conversations.apply_last_message(&newer).await.unwrap());
        assert!(!conversations.apply_last_message(&stale).await.unwrap());

        let loaded = conversations.get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(loaded.last_message.as_deref(), Some("newer"));
        assert_eq!(loaded.last_message_at, Some(at(11)));
    }

    #[tokio::test]
    async fn merge_remote_keeps_newer_cached_preview() {
        let store = LocalStore::in_memory();
        let conversations = store.conversations();
        conversations.put(conversation("c1")).await.unwrap();
        let newest = Message::compose("c1".into(), "u2".into(), "newest", at(11));
        assert!(conversations.apply_last_message(&newest).await.unwrap());

        let mut stale = conversation("c1");
        stale.title = "Renamed".into();
        stale.last_message = Some("remote".into());
        stale.last_message_at = Some(at(10));
        let mut fresh = conversation("c2");
        fresh.last_message = Some("from remote".into());
        fresh.last_message_at = Some(at(12));
        conversations.merge_remote(vec![stale, fresh]).await.unwrap();

        let c1 = conversations.get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.title, "Renamed");
        assert_eq!(c1.last_message.as_deref(), Some("newest"));
        assert_eq!(c1.last_message_at, Some(at(11)));

        let c2 = conversations.get_by_id("c2").await.unwrap().unwrap();
        assert_eq!(c2.last_message.as_deref(), Some("from remote"));
    }

    #[tokio::test]
    async fn merge_remote_takes_newer_remote_preview() {
        let store = LocalStore::in_memory();
        let conversations = store.conversations();
        conversations.put(conversation("c1")).await.unwrap();

        let mut remote = conversation("c1");
        remote.last_message = Some("hello, newer".into());
        remote.last_message_at = Some(at(12));
        conversations.merge_remote(vec![remote]).await.unwrap();

        let c1 = conversations.get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.last_message.as_deref(), Some("hello, newer"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn merge_remote_racing_a_new_message_never_regresses() {
        for round in 0..100 {
            let store = LocalStore::in_memory();
            let conversations = store.conversations();
            let mut cached = conversation("c1");
            cached.last_message_at = Some(at(8));
            conversations.put(cached).await.unwrap();

            let mut remote = conversation("c1");
            remote.last_message = Some("remote".into());
            remote.last_message_at = Some(at(10));
            let newest = Message::compose("c1".into(), "u2".into(), "newest", at(11));

            let merging = tokio::spawn({
                let conversations = conversations.clone();
                async move { conversations.merge_remote(vec![remote]).await }
            });
            let applying = tokio::spawn({
                let conversations = conversations.clone();
                async move { conversations.apply_last_message(&newest).await }
            });
            merging.await.unwrap().unwrap();
            applying.await.unwrap().unwrap();

            let c1 = conversations.get_by_id("c1").await.unwrap().unwrap();
            assert_eq!(c1.last_message.as_deref(), Some("newest"), "round {round}");
        }
    }

    #[tokio::test]
    async fn apply_last_message_without_conversation() {
        let store = LocalStore::in_memory();
        let orphan = Message::compose("nowhere".into(), "u1".into(), "x", at(7));
        assert!(!store.conversations().apply_last_message(&orphan).await.unwrap());
    }

    #[tokio::test]
    async fn last_message_index_lookup() {
        let store = LocalStore::in_memory();
        let conversations = store.conversations();
        conversations
            .bulk_put(vec![conversation("c1"), conversation("c2")])
            .await
            .unwrap();

        let hits = conversations
            .get_by_index(ConversationIndex::LastMessageAt, &to_storage_string(&at(9)))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn for_participant_filters_and_orders() {
        let store = LocalStore::in_memory();
        let conversations = store.conversations();

        let mut older = conversation("c1");
        older.last_message_at = Some(at(8));
        let mut newer = conversation("c2");
        newer.last_message_at = Some(at(10));
        let mut foreign = conversation("c3");
        foreign.participants = vec!["u3".into(), "u4".into()];

        conversations
            .bulk_put(vec![older, newer, foreign])
            .await
            .unwrap();

        let mine = conversations.for_participant(&"u1".into()).await.unwrap();
        let ids: Vec<_> = mine.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
        assert!(conversations.contains(&"c3".into()).await.unwrap());
    }
}
