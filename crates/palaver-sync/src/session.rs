//! Per-login sync context.
//!
//! A [`SyncSession`] is created when a user authenticates and dropped at
//! logout. It carries the current user id, the local cache and the remote
//! gateway, and implements the write paths: bulk pull-down, per-message
//! merge, optimistic sends and read-receipt propagation.
//!
//! Every local mutation is either an idempotent put-by-key or a monotonic
//! set union, so concurrent callers converge without coordination.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{SubsecRound, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use palaver_remote::{Filter, GatewayExt, Query, RemoteGateway, Table};
use palaver_shared::constants::DEFAULT_DIRECT_TITLE;
use palaver_shared::timestamp::to_storage_string;
use palaver_shared::{
    Conversation, ConversationId, ConversationLabel, Label, LabelId, Message, MessageId,
    MessageRow, User, UserId,
};
use palaver_store::{LocalStore, Repository};

use crate::error::{Result, SyncError};

/// Outcome of one bulk sync, table by table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Tables that synced, with the number of records pulled.
    pub synced: Vec<(Table, usize)>,
    /// Tables whose step failed and was skipped.
    pub failed: Vec<Table>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn count(&self, table: Table) -> Option<usize> {
        self.synced
            .iter()
            .find(|(t, _)| *t == table)
            .map(|(_, n)| *n)
    }

    fn record(&mut self, table: Table, outcome: Result<usize>) {
        match outcome {
            Ok(count) => {
                info!(%table, count, "table synced");
                self.synced.push((table, count));
            }
            Err(e) => {
                error!(%table, error = %e, "table sync failed, skipping");
                self.failed.push(table);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdRow<T> {
    id: T,
}

#[derive(Debug, Deserialize)]
struct ReadByRow {
    #[serde(default)]
    read_by: Option<Vec<UserId>>,
}

/// Sync coordinator bound to one authenticated user.
#[derive(Clone)]
pub struct SyncSession {
    user_id: UserId,
    store: LocalStore,
    remote: Arc<dyn RemoteGateway>,
    /// Ids of messages sent from this session. Their realtime inserts are
    /// echoes, not new messages.
    sent: Arc<Mutex<HashSet<MessageId>>>,
}

impl SyncSession {
    pub fn new(user_id: UserId, store: LocalStore, remote: Arc<dyn RemoteGateway>) -> Self {
        Self {
            user_id,
            store,
            remote,
            sent: Arc::default(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteGateway> {
        &self.remote
    }

    /// Whether `id` was sent from this session.
    pub fn sent_here(&self, id: &MessageId) -> bool {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(id)
    }

    fn remember_sent(&self, id: &MessageId) {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone());
    }

    // -----------------------------------------------------------------------
    // Bulk sync
    // -----------------------------------------------------------------------

    /// Pull everything relevant to the current user into the local cache.
    ///
    /// Tables are synced in order and each step is isolated: a failing step
    /// is logged and recorded in the report while the rest carry on.
    pub async fn sync_user_data(&self) -> SyncReport {
        info!(user = %self.user_id, "starting bulk sync");

        let mut report = SyncReport::default();
        report.record(Table::Users, self.sync_users().await);
        report.record(Table::Conversations, self.sync_conversations().await);
        report.record(Table::Labels, self.sync_labels().await);
        report.record(
            Table::ConversationLabels,
            self.sync_conversation_labels().await,
        );
        report.record(Table::Messages, self.sync_messages().await);

        info!(
            user = %self.user_id,
            failed = report.failed.len(),
            "bulk sync finished"
        );
        report
    }

    async fn sync_users(&self) -> Result<usize> {
        let users: Vec<User> = self.remote.fetch(Query::table(Table::Users)).await?;
        let count = users.len();
        self.store.users().bulk_put(users).await?;
        Ok(count)
    }

    async fn sync_conversations(&self) -> Result<usize> {
        let conversations: Vec<Conversation> = self
            .remote
            .fetch(
                Query::table(Table::Conversations)
                    .contains("participants", [self.user_id.as_str()]),
            )
            .await?;
        let count = conversations.len();
        self.store.conversations().merge_remote(conversations).await?;
        Ok(count)
    }

    async fn sync_labels(&self) -> Result<usize> {
        let labels: Vec<Label> = self.remote.fetch(Query::table(Table::Labels)).await?;
        let count = labels.len();
        self.store.labels().bulk_put(labels).await?;
        Ok(count)
    }

    async fn sync_conversation_labels(&self) -> Result<usize> {
        let ids = self.my_conversation_ids().await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let links: Vec<ConversationLabel> = self
            .remote
            .fetch(
                Query::table(Table::ConversationLabels)
                    .is_in("conversation_id", ids.iter().map(ConversationId::as_str)),
            )
            .await?;
        let count = links.len();
        self.store.conversation_labels().bulk_put(links).await?;
        Ok(count)
    }

    async fn sync_messages(&self) -> Result<usize> {
        let ids = self.my_conversation_ids().await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let rows: Vec<MessageRow> = self
            .remote
            .fetch(
                Query::table(Table::Messages)
                    .is_in("conversation_id", ids.iter().map(ConversationId::as_str))
                    .order("created_at", true),
            )
            .await?;

        let now = Utc::now();
        let messages: Vec<Message> = rows.into_iter().map(|row| row.normalize(now)).collect();
        let count = messages.len();

        let mut newest: HashMap<ConversationId, Message> = HashMap::new();
        for message in &messages {
            let replace = newest
                .get(&message.conversation_id)
                .map_or(true, |seen| message.created_at >= seen.created_at);
            if replace {
                newest.insert(message.conversation_id.clone(), message.clone());
            }
        }

        self.store.messages().merge_all(messages).await?;

        for message in newest.values() {
            if let Err(e) = self.store.conversations().apply_last_message(message).await {
                warn!(conversation = %message.conversation_id, error = %e, "preview update failed");
            }
        }
        Ok(count)
    }

    async fn my_conversation_ids(&self) -> Result<Vec<ConversationId>> {
        let rows: Vec<IdRow<ConversationId>> = self
            .remote
            .fetch(
                Query::table(Table::Conversations)
                    .select(&["id"])
                    .contains("participants", [self.user_id.as_str()]),
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    // -----------------------------------------------------------------------
    // Local merges
    // -----------------------------------------------------------------------

    /// Merge one message, locally authored or received, into the cache.
    ///
    /// A missing or unparseable `created_at` is stamped with the current
    /// time. A message whose id is already cached is left alone, which makes
    /// the realtime echo of an optimistic send a no-op. Returns the stored
    /// message when it was new.
    pub async fn save_message_locally(&self, row: MessageRow) -> Option<Message> {
        let message = row.normalize(Utc::now());

        match self.store.messages().insert_new(message.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(message_id = %message.id, "message already cached");
                return None;
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "failed to cache message");
                return None;
            }
        }

        if let Err(e) = self.store.conversations().apply_last_message(&message).await {
            warn!(
                conversation = %message.conversation_id,
                error = %e,
                "failed to update conversation preview"
            );
        }
        Some(message)
    }

    /// Cache one conversation as given.
    pub async fn save_conversation_locally(&self, conversation: Conversation) {
        let id = conversation.id.clone();
        if let Err(e) = self.store.conversations().put(conversation).await {
            warn!(conversation = %id, error = %e, "failed to cache conversation");
        }
    }

    /// Cached conversations of the current user, newest first. Empty on
    /// cache failure.
    pub async fn get_local_conversations(&self) -> Vec<Conversation> {
        self.store
            .conversations()
            .for_participant(&self.user_id)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to read cached conversations");
                Vec::new()
            })
    }

    /// Cached messages of one conversation, oldest first. Empty on cache
    /// failure.
    pub async fn get_local_messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.store
            .messages()
            .for_conversation(conversation_id)
            .await
            .unwrap_or_else(|e| {
                warn!(conversation = %conversation_id, error = %e, "failed to read cached messages");
                Vec::new()
            })
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// Send `text` to `conversation_id`.
    ///
    /// Without a selected conversation, or with blank text, nothing happens
    /// and `Ok(None)` is returned. Otherwise the message is written to the
    /// cache first, then to the remote along with the conversation preview.
    pub async fn send_message(
        &self,
        conversation_id: Option<&ConversationId>,
        text: &str,
    ) -> Result<Option<Message>> {
        let text = text.trim();
        let Some(conversation_id) = conversation_id else {
            debug!("send ignored: no conversation selected");
            return Ok(None);
        };
        if text.is_empty() {
            debug!("send ignored: empty message");
            return Ok(None);
        }

        let message = Message::compose(
            conversation_id.clone(),
            self.user_id.clone(),
            text,
            Utc::now().trunc_subsecs(6),
        );
        self.send_composed(message).await.map(Some)
    }

    /// Send a message authored by this client: cache it, write it to the
    /// remote, then move the remote conversation preview. Its realtime echo
    /// is recognized through [`sent_here`](Self::sent_here).
    pub async fn send_composed(&self, message: Message) -> Result<Message> {
        self.remember_sent(&message.id);
        self.save_message_locally(MessageRow::from(message.clone()))
            .await;

        self.remote.insert_record(Table::Messages, &message).await?;
        self.remote
            .update(
                Table::Conversations,
                json!({
                    "last_message": message.message,
                    "last_message_at": to_storage_string(&message.created_at),
                }),
                vec![Filter::eq("id", message.conversation_id.as_str())],
            )
            .await?;

        info!(message_id = %message.id, conversation = %message.conversation_id, "message sent");
        Ok(message)
    }

    /// Record that the current user has read `message_id`, locally and
    /// remotely. Repeating it changes nothing.
    pub async fn mark_read(&self, message_id: &MessageId) -> Result<()> {
        if let Err(e) = self
            .store
            .messages()
            .add_reader(message_id, &self.user_id)
            .await
        {
            warn!(message_id = %message_id, error = %e, "failed to mark cached message read");
        }

        let row: Option<ReadByRow> = self
            .remote
            .fetch_one(
                Query::table(Table::Messages)
                    .select(&["id", "read_by"])
                    .eq("id", message_id.as_str()),
            )
            .await?;
        let Some(row) = row else {
            return Ok(());
        };

        let mut readers = row.read_by.unwrap_or_default();
        if readers.contains(&self.user_id) {
            return Ok(());
        }
        readers.push(self.user_id.clone());

        self.remote
            .update(
                Table::Messages,
                json!({ "read_by": readers }),
                vec![Filter::eq("id", message_id.as_str())],
            )
            .await?;
        debug!(message_id = %message_id, "marked read");
        Ok(())
    }

    /// Mark every message of a conversation read. Returns how many messages
    /// were unread remotely.
    pub async fn mark_conversation_read(&self, conversation_id: &ConversationId) -> Result<usize> {
        for message in self.get_local_messages(conversation_id).await {
            if !message.is_read_by(&self.user_id) {
                if let Err(e) = self
                    .store
                    .messages()
                    .add_reader(&message.id, &self.user_id)
                    .await
                {
                    warn!(message_id = %message.id, error = %e, "failed to mark cached message read");
                }
            }
        }

        let unread: Vec<IdRow<MessageId>> = self
            .remote
            .fetch(
                Query::table(Table::Messages)
                    .select(&["id"])
                    .eq("conversation_id", conversation_id.as_str())
                    .not_contains("read_by", [self.user_id.as_str()]),
            )
            .await?;

        for row in &unread {
            self.mark_read(&row.id).await?;
        }
        Ok(unread.len())
    }

    /// Open a direct conversation with `other`, reusing an existing one.
    pub async fn start_direct_conversation(&self, other: &UserId) -> Result<Conversation> {
        let existing: Vec<Conversation> = self
            .remote
            .fetch(
                Query::table(Table::Conversations)
                    .eq("is_group", false)
                    .contains("participants", [self.user_id.as_str(), other.as_str()]),
            )
            .await?;

        if let Some(conversation) = existing.into_iter().next() {
            debug!(conversation = %conversation.id, "reusing direct conversation");
            self.save_conversation_locally(conversation.clone()).await;
            return Ok(conversation);
        }

        let contact: Option<User> = self
            .remote
            .fetch_one(Query::table(Table::Users).eq("id", other.as_str()))
            .await?;
        let title = contact.map_or_else(|| DEFAULT_DIRECT_TITLE.to_string(), |u| u.fullname);

        let draft = Conversation::direct(title, self.user_id.clone(), other.clone());
        self.create_conversation(draft).await
    }

    /// Create a group with the current user and `members`. Without a title
    /// the group is called "Group with N people", N counting `members`.
    pub async fn create_group(
        &self,
        members: Vec<UserId>,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let title = match title.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("Group with {} people", members.len()),
        };
        let draft = Conversation::group(title, self.user_id.clone(), members);
        self.create_conversation(draft).await
    }

    async fn create_conversation(&self, draft: Conversation) -> Result<Conversation> {
        let stored = self
            .remote
            .insert_record(Table::Conversations, &draft)
            .await?;
        let conversation: Conversation = serde_json::from_value(stored)
            .map_err(|e| SyncError::Remote(e.into()))?;

        info!(conversation = %conversation.id, group = conversation.is_group, "conversation created");
        self.save_conversation_locally(conversation.clone()).await;
        Ok(conversation)
    }

    /// Attach `label_id` to a conversation. Returns `false` if it was
    /// already attached.
    pub async fn add_label(
        &self,
        conversation_id: &ConversationId,
        label_id: &LabelId,
    ) -> Result<bool> {
        let existing = self
            .remote
            .count(
                Query::table(Table::ConversationLabels)
                    .eq("conversation_id", conversation_id.as_str())
                    .eq("label_id", label_id.as_str()),
            )
            .await?;
        if existing > 0 {
            debug!(conversation = %conversation_id, label = %label_id, "label already attached");
            return Ok(false);
        }

        let stored = self
            .remote
            .insert(
                Table::ConversationLabels,
                json!({
                    "conversation_id": conversation_id,
                    "label_id": label_id,
                }),
            )
            .await?;
        let link: ConversationLabel =
            serde_json::from_value(stored).map_err(|e| SyncError::Remote(e.into()))?;

        if let Err(e) = self.store.conversation_labels().put(link).await {
            warn!(conversation = %conversation_id, error = %e, "failed to cache label");
        }
        Ok(true)
    }

    /// Detach `label_id` from a conversation. Returns whether anything was
    /// removed remotely.
    pub async fn remove_label(
        &self,
        conversation_id: &ConversationId,
        label_id: &LabelId,
    ) -> Result<bool> {
        let removed = self
            .remote
            .delete(
                Table::ConversationLabels,
                vec![
                    Filter::eq("conversation_id", conversation_id.as_str()),
                    Filter::eq("label_id", label_id.as_str()),
                ],
            )
            .await?;

        if let Err(e) = self
            .store
            .conversation_labels()
            .remove_pair(conversation_id, label_id)
            .await
        {
            warn!(conversation = %conversation_id, error = %e, "failed to uncache label");
        }
        Ok(removed > 0)
    }

    /// Every user except the current one, by full name. Served from the
    /// cache when the remote is unavailable.
    pub async fn list_contacts(&self) -> Vec<User> {
        let mut contacts = match self
            .remote
            .fetch::<User>(Query::table(Table::Users).neq("id", self.user_id.as_str()))
            .await
        {
            Ok(users) => {
                if let Err(e) = self.store.users().bulk_put(users.clone()).await {
                    warn!(error = %e, "failed to cache contacts");
                }
                users
            }
            Err(e) => {
                warn!(error = %e, "contacts fetch failed, using cache");
                self.store
                    .users()
                    .get_all()
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|u| u.id != self.user_id)
                    .collect()
            }
        };
        contacts.sort_by(|a, b| a.fullname.cmp(&b.fullname));
        contacts
    }

    /// Wipe the local cache.
    pub async fn reset(&self) -> Result<()> {
        self.store.clear_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use palaver_remote::MemoryGateway;
    use serde_json::Value;

    use super::*;

    fn ts(h: u32) -> String {
        to_storage_string(&Utc.with_ymd_and_hms(2025, 3, 7, h, 0, 0).unwrap())
    }

    fn seeded() -> (SyncSession, MemoryGateway) {
        let remote = MemoryGateway::new();
        remote
            .seed(
                Table::Users,
                [
                    json!({"id": "u1", "fullname": "Alice", "username": "alice", "gender": "female"}),
                    json!({"id": "u2", "fullname": "Bob", "username": "bob", "gender": "male"}),
                ],
            )
            .unwrap();
        remote
            .seed(
                Table::Conversations,
                [
                    json!({"id": "c1", "title": "Chat", "is_group": false, "participants": ["u1", "u2"],
                           "last_message": "second", "last_message_at": ts(10)}),
                    json!({"id": "c9", "title": "Other", "is_group": false, "participants": ["u2", "u3"]}),
                ],
            )
            .unwrap();
        remote
            .seed(Table::Labels, [json!({"id": "l1", "name": "Work", "color": "#00f"})])
            .unwrap();
        remote
            .seed(
                Table::ConversationLabels,
                [
                    json!({"id": "cl1", "conversation_id": "c1", "label_id": "l1"}),
                    json!({"id": "cl9", "conversation_id": "c9", "label_id": "l1"}),
                ],
            )
            .unwrap();
        remote
            .seed(
                Table::Messages,
                [
                    json!({"id": "m1", "conversation_id": "c1", "sender_id": "u1", "message": "first",
                           "created_at": ts(9), "read_by": ["u1"]}),
                    json!({"id": "m2", "conversation_id": "c1", "sender_id": "u2", "message": "second",
                           "created_at": ts(10), "read_by": null}),
                    json!({"id": "m9", "conversation_id": "c9", "sender_id": "u2", "message": "elsewhere",
                           "created_at": ts(10)}),
                ],
            )
            .unwrap();

        let session = SyncSession::new(
            "u1".into(),
            LocalStore::in_memory(),
            Arc::new(remote.clone()),
        );
        (session, remote)
    }

    #[tokio::test]
    async fn bulk_sync_pulls_only_my_data() {
        let (session, _remote) = seeded();
        let report = session.sync_user_data().await;

        assert!(report.is_complete());
        assert_eq!(report.count(Table::Users), Some(2));
        assert_eq!(report.count(Table::Conversations), Some(1));
        assert_eq!(report.count(Table::ConversationLabels), Some(1));
        assert_eq!(report.count(Table::Messages), Some(2));

        let store = session.store();
        assert!(store.conversations().get_by_id("c9").await.unwrap().is_none());
        let m2 = store.messages().get_by_id("m2").await.unwrap().unwrap();
        assert!(m2.is_read_by(&"u2".into()));
    }

    #[tokio::test]
    async fn bulk_sync_isolates_failures() {
        let (session, remote) = seeded();
        remote.take_offline(Table::Labels).unwrap();

        let report = session.sync_user_data().await;
        assert_eq!(report.failed, vec![Table::Labels]);
        assert_eq!(report.count(Table::Messages), Some(2));
        assert!(session.store().labels().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_message_locally_is_idempotent() {
        let (session, _remote) = seeded();
        session.sync_user_data().await;

        let row = MessageRow {
            id: "m3".into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            message: "third".into(),
            created_at: Some(Value::String(ts(11))),
            read_by: None,
        };
        assert!(session.save_message_locally(row.clone()).await.is_some());
        assert!(session.save_message_locally(row).await.is_none());

        assert_eq!(session.get_local_messages(&"c1".into()).await.len(), 3);
        let c1 = session.store().conversations().get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.last_message.as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn backfilled_message_does_not_regress_preview() {
        let (session, _remote) = seeded();
        session.sync_user_data().await;

        let old = MessageRow {
            id: "m0".into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            message: "ancient".into(),
            created_at: Some(Value::String(ts(1))),
            read_by: None,
        };
        session.save_message_locally(old).await;

        let c1 = session.store().conversations().get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.last_message.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn missing_timestamp_is_stamped_now() {
        let (session, _remote) = seeded();
        let before = Utc::now() - Duration::seconds(1);
        let row = MessageRow {
            id: "m5".into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            message: "no clock".into(),
            created_at: Some(Value::String("garbage".into())),
            read_by: None,
        };
        let stored = session.save_message_locally(row).await.unwrap();
        assert!(stored.created_at >= before);
    }

    #[tokio::test]
    async fn send_guard_is_silent() {
        let (session, remote) = seeded();
        assert!(session.send_message(None, "hello").await.unwrap().is_none());
        assert!(session
            .send_message(Some(&"c1".into()), "   ")
            .await
            .unwrap()
            .is_none());
        assert_eq!(remote.rows(Table::Messages).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn send_writes_local_then_remote() {
        let (session, remote) = seeded();
        session.sync_user_data().await;

        let sent = session
            .send_message(Some(&"c1".into()), "hello there")
            .await
            .unwrap()
            .unwrap();

        assert!(sent.is_read_by(&"u1".into()));
        assert!(session
            .store()
            .messages()
            .get_by_id(sent.id.as_str())
            .await
            .unwrap()
            .is_some());

        let rows = remote.rows(Table::Messages).unwrap();
        assert!(rows.iter().any(|r| r["id"] == sent.id.as_str()));
        let conv = remote
            .fetch_one::<Conversation>(Query::table(Table::Conversations).eq("id", "c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conv.last_message.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn mark_read_is_a_union_everywhere() {
        let (session, remote) = seeded();
        session.sync_user_data().await;

        for _ in 0..3 {
            session.mark_read(&"m2".into()).await.unwrap();
        }

        let local = session.store().messages().get_by_id("m2").await.unwrap().unwrap();
        assert_eq!(local.read_by.len(), 2);

        let row = remote
            .fetch_one::<MessageRow>(Query::table(Table::Messages).eq("id", "m2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.read_by, Some(vec![UserId::from("u1")]));
    }

    #[tokio::test]
    async fn mark_conversation_read_counts_unread() {
        let (session, _remote) = seeded();
        session.sync_user_data().await;

        assert_eq!(session.mark_conversation_read(&"c1".into()).await.unwrap(), 1);
        assert_eq!(session.mark_conversation_read(&"c1".into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn direct_conversation_is_reused() {
        let (session, remote) = seeded();
        let existing = session.start_direct_conversation(&"u2".into()).await.unwrap();
        assert_eq!(existing.id.as_str(), "c1");

        remote
            .seed(
                Table::Users,
                [json!({"id": "u4", "fullname": "Dana", "username": "dana", "gender": "female"})],
            )
            .unwrap();
        let fresh = session.start_direct_conversation(&"u4".into()).await.unwrap();
        assert_eq!(fresh.title, "Dana");
        assert_eq!(fresh.participants, vec![UserId::from("u1"), UserId::from("u4")]);
        assert!(session
            .store()
            .conversations()
            .contains(&fresh.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn group_gets_default_title() {
        let (session, _remote) = seeded();
        let group = session
            .create_group(vec!["u2".into(), "u3".into()], None)
            .await
            .unwrap();
        assert_eq!(group.title, "Group with 2 people");
        assert!(group.is_group);
        assert_eq!(group.participants.len(), 3);
    }

    #[tokio::test]
    async fn labels_attach_once_and_detach() {
        let (session, _remote) = seeded();
        let c1 = ConversationId::from("c1");
        let l2 = LabelId::from("l2");

        assert!(session.add_label(&c1, &l2).await.unwrap());
        assert!(!session.add_label(&c1, &l2).await.unwrap());
        assert_eq!(
            session
                .store()
                .conversation_labels()
                .for_conversation(&c1)
                .await
                .unwrap()
                .len(),
            1
        );

        assert!(session.remove_label(&c1, &l2).await.unwrap());
        assert!(session
            .store()
            .conversation_labels()
            .for_conversation(&c1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn contacts_fall_back_to_cache() {
        let (session, remote) = seeded();
        let online = session.list_contacts().await;
        assert_eq!(online.len(), 1);

        remote.take_offline(Table::Users).unwrap();
        let offline = session.list_contacts().await;
        assert_eq!(offline, online);
    }

    #[tokio::test]
    async fn reset_clears_the_cache() {
        let (session, _remote) = seeded();
        session.sync_user_data().await;
        session.reset().await.unwrap();
        assert!(session.get_local_conversations().await.is_empty());
    }
}
