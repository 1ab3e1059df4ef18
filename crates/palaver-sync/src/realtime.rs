//! Realtime consumers.
//!
//! Each open view owns one coordinating task that pulls from its channels
//! and merges what arrives. Channels are released when the consumer is
//! closed or dropped; nothing is processed after that.

use std::collections::HashSet;

use futures::stream::{select_all, SelectAll};
use futures::StreamExt;
use tracing::{debug, warn};

use palaver_remote::{
    ChangeEvent, ChangeType, EventKind, Filter, GatewayExt, Query, Subscription,
    SubscriptionSpec, Table,
};
use palaver_shared::{Conversation, ConversationId, Message, MessageId, MessageRow, User};
use palaver_store::Repository;

use crate::compose::{compose_message_list, MessageView};
use crate::error::Result;
use crate::session::SyncSession;

/// Live message feed of one open conversation.
pub struct ConversationFeed {
    session: SyncSession,
    conversation_id: ConversationId,
    subscription: Subscription,
    seen: HashSet<MessageId>,
    mark_read: bool,
}

impl ConversationFeed {
    /// Subscribe to inserts for `conversation_id`. Messages already cached
    /// count as seen. With `mark_read`, incoming messages from others are
    /// marked read as they arrive.
    pub async fn open(
        session: SyncSession,
        conversation_id: ConversationId,
        mark_read: bool,
    ) -> Result<Self> {
        let subscription = session
            .remote()
            .subscribe(
                SubscriptionSpec::new(Table::Messages, EventKind::Insert)
                    .filter(Filter::eq("conversation_id", conversation_id.as_str())),
            )
            .await?;

        let seen = session
            .get_local_messages(&conversation_id)
            .await
            .into_iter()
            .map(|m| m.id)
            .collect();

        debug!(conversation = %conversation_id, "conversation feed opened");
        Ok(Self {
            session,
            conversation_id,
            subscription,
            seen,
            mark_read,
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Send through the session and remember the id so the echo is ignored.
    pub async fn send(&mut self, text: &str) -> Result<Option<Message>> {
        let sent = self
            .session
            .send_message(Some(&self.conversation_id), text)
            .await?;
        if let Some(message) = &sent {
            self.seen.insert(message.id.clone());
        }
        Ok(sent)
    }

    /// Next message that is new to this view. Messages already shown and
    /// echoes of messages sent from this session are skipped. `None` once
    /// the channel closes.
    pub async fn next_message(&mut self) -> Option<MessageView> {
        while let Some(event) = self.subscription.next().await {
            let Some(row) = decode_message(&event) else {
                continue;
            };
            if !self.seen.insert(row.id.clone()) || self.session.sent_here(&row.id) {
                debug!(message_id = %row.id, "echo of a shown message ignored");
                continue;
            }

            let id = row.id.clone();
            let message = match self.session.save_message_locally(row.clone()).await {
                Some(stored) => stored,
                // Cached by another consumer first; still new to this view.
                None => match self.cached(&id).await {
                    Some(cached) => cached,
                    None => row.normalize(chrono::Utc::now()),
                },
            };

            if self.mark_read && message.sender_id != *self.session.user_id() {
                if let Err(e) = self.session.mark_read(&id).await {
                    warn!(message_id = %id, error = %e, "failed to mark incoming message read");
                }
            }

            let sender = self.sender(&message).await;
            let users = sender.into_iter().map(|u| (u.id.clone(), u)).collect();
            return compose_message_list(vec![message], &users).pop();
        }
        None
    }

    async fn cached(&self, id: &MessageId) -> Option<Message> {
        match self.session.store().messages().get_by_id(id.as_str()).await {
            Ok(found) => found,
            Err(e) => {
                warn!(message_id = %id, error = %e, "failed to read cached message");
                None
            }
        }
    }

    async fn sender(&self, message: &Message) -> Option<User> {
        let cached = self
            .session
            .store()
            .users()
            .get_by_id(message.sender_id.as_str())
            .await;
        if let Ok(Some(user)) = cached {
            return Some(user);
        }

        match self
            .session
            .remote()
            .fetch_one::<User>(Query::table(Table::Users).eq("id", message.sender_id.as_str()))
            .await
        {
            Ok(user) => user,
            Err(e) => {
                warn!(sender = %message.sender_id, error = %e, "sender lookup failed");
                None
            }
        }
    }

    /// Release the channel.
    pub fn close(self) {
        debug!(conversation = %self.conversation_id, "conversation feed closed");
        self.subscription.unsubscribe();
    }
}

/// What changed under the conversation list.
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange {
    /// A conversation row changed; the cache holds the merged copy.
    Conversation(ConversationId),
    /// A message was inserted. `Some` when it was new to the cache.
    Message(Option<Message>),
    /// Label associations changed.
    Labels,
}

/// Watches the tables behind the conversation list.
pub struct ConversationListWatcher {
    session: SyncSession,
    events: SelectAll<Subscription>,
}

impl ConversationListWatcher {
    /// Subscribe to the current user's conversations, all message inserts
    /// and all label association changes.
    pub async fn open(session: SyncSession) -> Result<Self> {
        let remote = session.remote();
        let conversations = remote
            .subscribe(
                SubscriptionSpec::new(Table::Conversations, EventKind::All).filter(
                    Filter::contains("participants", [session.user_id().as_str()]),
                ),
            )
            .await?;
        let messages = remote
            .subscribe(SubscriptionSpec::new(Table::Messages, EventKind::Insert))
            .await?;
        let labels = remote
            .subscribe(SubscriptionSpec::new(
                Table::ConversationLabels,
                EventKind::All,
            ))
            .await?;

        debug!(user = %session.user_id(), "conversation list watcher opened");
        Ok(Self {
            session,
            events: select_all([conversations, messages, labels]),
        })
    }

    /// Merge the next event into the cache and report what changed.
    pub async fn next_change(&mut self) -> Option<ListChange> {
        while let Some(event) = self.events.next().await {
            match event.table {
                Table::Messages => {
                    let Some(row) = decode_message(&event) else {
                        continue;
                    };
                    let mine = self
                        .session
                        .store()
                        .conversations()
                        .contains(&row.conversation_id)
                        .await
                        .unwrap_or(false);
                    if !mine {
                        debug!(message_id = %row.id, "message for an uncached conversation");
                        return Some(ListChange::Message(None));
                    }
                    let stored = self.session.save_message_locally(row).await;
                    return Some(ListChange::Message(stored));
                }
                Table::Conversations => {
                    if let Some(id) = self.merge_conversation(&event).await {
                        return Some(ListChange::Conversation(id));
                    }
                }
                Table::ConversationLabels => return Some(ListChange::Labels),
                other => debug!(table = %other, "unexpected event ignored"),
            }
        }
        None
    }

    async fn merge_conversation(&self, event: &ChangeEvent) -> Option<ConversationId> {
        if event.event_type == ChangeType::Delete {
            let old: Option<Conversation> = event.decode_old().ok().flatten();
            return old.map(|c| c.id);
        }

        let conversation: Conversation = match event.decode_new() {
            Ok(Some(c)) => c,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "undecodable conversation event");
                return None;
            }
        };
        let id = conversation.id.clone();
        if let Err(e) = self
            .session
            .store()
            .conversations()
            .merge_remote(vec![conversation])
            .await
        {
            warn!(conversation = %id, error = %e, "failed to cache conversation change");
        }
        Some(id)
    }

    /// Release every channel.
    pub fn close(self) {
        debug!(user = %self.session.user_id(), "conversation list watcher closed");
    }
}

fn decode_message(event: &ChangeEvent) -> Option<MessageRow> {
    match event.decode_new::<MessageRow>() {
        Ok(row) => row,
        Err(e) => {
            warn!(error = %e, "undecodable message event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use palaver_remote::{MemoryGateway, RemoteGateway};
    use palaver_store::LocalStore;

    use super::*;

    async fn session() -> (SyncSession, MemoryGateway) {
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
                [json!({"id": "c1", "title": "Chat", "is_group": false, "participants": ["u1", "u2"]})],
            )
            .unwrap();
        let session = SyncSession::new("u1".into(), LocalStore::in_memory(), Arc::new(remote.clone()));
        session.sync_user_data().await;
        (session, remote)
    }

    #[tokio::test]
    async fn feed_skips_echo_of_own_send() {
        let (session, remote) = session().await;
        let mut feed = ConversationFeed::open(session.clone(), "c1".into(), true)
            .await
            .unwrap();

        let sent = feed.send("hello").await.unwrap().unwrap();
        remote
            .insert(
                Table::Messages,
                json!({"id": "m-bob", "conversation_id": "c1", "sender_id": "u2", "message": "hey"}),
            )
            .await
            .unwrap();

        let next = feed.next_message().await.unwrap();
        assert_eq!(next.message.id.as_str(), "m-bob");
        assert_eq!(next.sender.fullname, "Bob");

        let messages = session.get_local_messages(&"c1".into()).await;
        assert_eq!(messages.iter().filter(|m| m.id == sent.id).count(), 1);
        assert_eq!(messages.len(), 2);

        let read = remote
            .fetch_one::<MessageRow>(Query::table(Table::Messages).eq("id", "m-bob"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.read_by, Some(vec!["u1".into()]));

        feed.close();
        assert_eq!(remote.subscriber_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn feed_shows_message_cached_by_list_watcher() {
        let (session, remote) = session().await;
        let mut watcher = ConversationListWatcher::open(session.clone()).await.unwrap();
        let mut feed = ConversationFeed::open(session.clone(), "c1".into(), true)
            .await
            .unwrap();

        remote
            .insert(
                Table::Messages,
                json!({"id": "m-bob", "conversation_id": "c1", "sender_id": "u2", "message": "hey"}),
            )
            .await
            .unwrap();

        match watcher.next_change().await.unwrap() {
            ListChange::Message(Some(m)) => assert_eq!(m.id.as_str(), "m-bob"),
            other => panic!("unexpected change {other:?}"),
        }

        let shown = tokio::time::timeout(std::time::Duration::from_secs(1), feed.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shown.message.id.as_str(), "m-bob");
        assert_eq!(shown.sender.fullname, "Bob");

        let read = remote
            .fetch_one::<MessageRow>(Query::table(Table::Messages).eq("id", "m-bob"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.read_by, Some(vec!["u1".into()]));

        feed.close();
        watcher.close();
    }

    #[tokio::test]
    async fn feed_skips_echo_of_session_send() {
        let (session, remote) = session().await;
        let mut feed = ConversationFeed::open(session.clone(), "c1".into(), false)
            .await
            .unwrap();

        let sent = session
            .send_message(Some(&"c1".into()), "from elsewhere")
            .await
            .unwrap()
            .unwrap();
        assert!(session.sent_here(&sent.id));

        remote
            .insert(
                Table::Messages,
                json!({"id": "m-bob", "conversation_id": "c1", "sender_id": "u2", "message": "hey"}),
            )
            .await
            .unwrap();

        let next = feed.next_message().await.unwrap();
        assert_eq!(next.message.id.as_str(), "m-bob");
        feed.close();
    }

    #[tokio::test]
    async fn watcher_merges_inserts_and_reports_labels() {
        let (session, remote) = session().await;
        let mut watcher = ConversationListWatcher::open(session.clone()).await.unwrap();

        remote
            .insert(
                Table::Messages,
                json!({"id": "m1", "conversation_id": "c1", "sender_id": "u2", "message": "new"}),
            )
            .await
            .unwrap();
        match watcher.next_change().await.unwrap() {
            ListChange::Message(Some(m)) => assert_eq!(m.id.as_str(), "m1"),
            other => panic!("unexpected change {other:?}"),
        }
        let c1 = session.store().conversations().get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.last_message.as_deref(), Some("new"));

        remote
            .insert(
                Table::ConversationLabels,
                json!({"conversation_id": "c1", "label_id": "l1"}),
            )
            .await
            .unwrap();
        assert_eq!(watcher.next_change().await, Some(ListChange::Labels));

        watcher.close();
        assert_eq!(remote.subscriber_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn watcher_caches_conversation_updates() {
        let (session, remote) = session().await;
        let mut watcher = ConversationListWatcher::open(session.clone()).await.unwrap();

        remote
            .update(
                Table::Conversations,
                json!({"title": "Renamed"}),
                vec![Filter::eq("id", "c1")],
            )
            .await
            .unwrap();

        assert_eq!(
            watcher.next_change().await,
            Some(ListChange::Conversation("c1".into()))
        );
        let c1 = session.store().conversations().get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.title, "Renamed");
    }
}
