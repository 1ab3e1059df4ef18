//! Local-first, remote-refresh reads.
//!
//! Every read produces a short stream of [`Snapshot`]s: the cached view as
//! soon as the cache has something for the requested scope, then the
//! authoritative remote view once it arrives. The remote result is written
//! back to the cache before it is emitted. When the remote fails the cached
//! view simply stays; when both come up empty an empty local snapshot is
//! emitted so callers can stop waiting.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use palaver_remote::{GatewayExt, Query, Table};
use palaver_shared::{
    Conversation, ConversationId, ConversationLabel, Label, MessageRow, User, UserId,
};
use palaver_store::Repository;

use crate::compose::{
    compose_conversation_details, compose_conversation_list, compose_message_list,
    labels_by_conversation, unread_counts, ConversationView, MessageView, RelatedLookups,
};
use crate::session::SyncSession;

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Remote,
}

/// One rendering of a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub source: Source,
    pub data: T,
}

enum Arrival<T> {
    Local(Option<T>),
    Remote(Option<T>),
}

#[derive(Default)]
struct Progress {
    local_done: bool,
    remote_done: bool,
    remote_shown: bool,
    anything_shown: bool,
}

impl Progress {
    fn step<T: Default>(&mut self, arrival: Arrival<T>) -> Option<Snapshot<T>> {
        match arrival {
            Arrival::Remote(Some(data)) => {
                self.remote_done = true;
                self.remote_shown = true;
                self.anything_shown = true;
                Some(Snapshot {
                    source: Source::Remote,
                    data,
                })
            }
            Arrival::Local(Some(data)) => {
                self.local_done = true;
                if self.remote_shown {
                    debug!("cached snapshot arrived after remote, dropped");
                    return None;
                }
                self.anything_shown = true;
                Some(Snapshot {
                    source: Source::Local,
                    data,
                })
            }
            Arrival::Remote(None) => {
                self.remote_done = true;
                self.empty_if_nothing_shown()
            }
            Arrival::Local(None) => {
                self.local_done = true;
                self.empty_if_nothing_shown()
            }
        }
    }

    fn empty_if_nothing_shown<T: Default>(&mut self) -> Option<Snapshot<T>> {
        if self.local_done && self.remote_done && !self.anything_shown {
            self.anything_shown = true;
            return Some(Snapshot {
                source: Source::Local,
                data: T::default(),
            });
        }
        None
    }
}

/// Race a cache read against a remote read.
///
/// `local` yields `None` when the cache has nothing for the scope, `remote`
/// yields `None` when the remote call failed. A cached snapshot is never
/// emitted after the remote one.
pub fn local_first<'a, T, L, R>(local: L, remote: R) -> BoxStream<'a, Snapshot<T>>
where
    T: Default + Send + 'a,
    L: Future<Output = Option<T>> + Send + 'a,
    R: Future<Output = Option<T>> + Send + 'a,
{
    let local = stream::once(async move { Arrival::Local(local.await) });
    let remote = stream::once(async move { Arrival::Remote(remote.await) });

    stream::select(local, remote)
        .scan(Progress::default(), |progress, arrival| {
            futures::future::ready(Some(progress.step(arrival)))
        })
        .filter_map(futures::future::ready)
        .boxed()
}

/// Read side of a session.
#[derive(Clone)]
pub struct Reader {
    session: SyncSession,
}

impl Reader {
    pub fn new(session: SyncSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    fn me(&self) -> &UserId {
        self.session.user_id()
    }

    // -----------------------------------------------------------------------
    // Conversation list
    // -----------------------------------------------------------------------

    /// The current user's conversation list, cache first.
    pub fn conversation_list(&self) -> BoxStream<'_, Snapshot<Vec<ConversationView>>> {
        local_first(
            self.local_conversation_list(),
            self.remote_conversation_list(),
        )
    }

    /// Compose the list from the cache alone. `None` when nothing is cached.
    pub async fn local_conversation_list(&self) -> Option<Vec<ConversationView>> {
        let conversations = self.session.get_local_conversations().await;
        if conversations.is_empty() {
            return None;
        }

        let ids: Vec<ConversationId> = conversations.iter().map(|c| c.id.clone()).collect();
        let lookups = RelatedLookups::default()
            .with_users(self.local_users().await)
            .with_labels(labels_by_conversation(
                &self.local_links(&ids).await,
                &self.local_labels().await,
            ))
            .with_unread_counts(self.local_unread_counts(&ids).await);

        Some(compose_conversation_list(conversations, self.me(), &lookups))
    }

    /// Fetch, persist and compose the list from the remote. `None` when the
    /// conversations themselves cannot be fetched; other lookups degrade to
    /// cached data.
    pub async fn remote_conversation_list(&self) -> Option<Vec<ConversationView>> {
        let remote = self.session.remote();
        let conversations: Vec<Conversation> = match remote
            .fetch(
                Query::table(Table::Conversations)
                    .contains("participants", [self.me().as_str()])
                    .order("last_message_at", false),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "conversation list fetch failed, keeping cached view");
                return None;
            }
        };

        if let Err(e) = self
            .session
            .store()
            .conversations()
            .merge_remote(conversations.clone())
            .await
        {
            warn!(error = %e, "failed to cache conversation list");
        }
        // Re-read so that cached previews newer than the remote ones are shown.
        let conversations = self.merged_conversations(conversations).await;

        let ids: Vec<ConversationId> = conversations.iter().map(|c| c.id.clone()).collect();
        let participant_ids: HashSet<&UserId> =
            conversations.iter().flat_map(|c| &c.participants).collect();

        let users = self.remote_users(participant_ids.into_iter()).await;
        let labels = self.remote_labels().await;
        let links = self.remote_links(&ids).await;
        let unread = self.remote_unread_counts(&ids).await;

        let lookups = RelatedLookups::default()
            .with_users(users)
            .with_labels(labels_by_conversation(&links, &labels))
            .with_unread_counts(unread);

        Some(compose_conversation_list(conversations, self.me(), &lookups))
    }

    async fn merged_conversations(&self, fetched: Vec<Conversation>) -> Vec<Conversation> {
        let collection = self.session.store().conversations();
        let mut merged = Vec::with_capacity(fetched.len());
        for conversation in fetched {
            match collection.get_by_id(conversation.id.as_str()).await {
                Ok(Some(stored)) => merged.push(stored),
                _ => merged.push(conversation),
            }
        }
        merged
    }

    // -----------------------------------------------------------------------
    // Message list
    // -----------------------------------------------------------------------

    /// Messages of one conversation with sender info, cache first.
    pub fn message_list<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxStream<'a, Snapshot<Vec<MessageView>>> {
        local_first(
            self.local_message_list(conversation_id),
            self.remote_message_list(conversation_id),
        )
    }

    pub async fn local_message_list(
        &self,
        conversation_id: &ConversationId,
    ) -> Option<Vec<MessageView>> {
        let messages = self.session.get_local_messages(conversation_id).await;
        if messages.is_empty() {
            return None;
        }
        let users = user_map(self.local_users().await);
        Some(compose_message_list(messages, &users))
    }

    /// Fetch the conversation's messages, merge them into the cache and
    /// compose from the merged result, which keeps unconfirmed local sends
    /// visible.
    pub async fn remote_message_list(
        &self,
        conversation_id: &ConversationId,
    ) -> Option<Vec<MessageView>> {
        let rows: Vec<MessageRow> = match self
            .session
            .remote()
            .fetch(
                Query::table(Table::Messages)
                    .eq("conversation_id", conversation_id.as_str())
                    .order("created_at", true),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "message fetch failed, keeping cached view");
                return None;
            }
        };

        let now = Utc::now();
        let fetched: Vec<_> = rows.into_iter().map(|r| r.normalize(now)).collect();

        let messages = match self.session.store().messages().merge_all(fetched.clone()).await {
            Ok(()) => {
                let merged = self.session.get_local_messages(conversation_id).await;
                if merged.is_empty() {
                    fetched
                } else {
                    merged
                }
            }
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "failed to cache messages");
                fetched
            }
        };

        let sender_ids: HashSet<&UserId> = messages.iter().map(|m| &m.sender_id).collect();
        let users = user_map(self.remote_users(sender_ids.into_iter()).await);
        Some(compose_message_list(messages, &users))
    }

    // -----------------------------------------------------------------------
    // Conversation details
    // -----------------------------------------------------------------------

    /// One conversation with every participant's info, for a chat header.
    /// Remote first, cache when the remote is unavailable. `None` when the
    /// conversation is unknown to both.
    pub async fn conversation_details(
        &self,
        conversation_id: &ConversationId,
    ) -> Option<ConversationView> {
        let fetched = self
            .session
            .remote()
            .fetch_one::<Conversation>(
                Query::table(Table::Conversations).eq("id", conversation_id.as_str()),
            )
            .await;

        let conversation = match fetched {
            Ok(Some(conversation)) => {
                self.session
                    .save_conversation_locally(conversation.clone())
                    .await;
                conversation
            }
            Ok(None) => return None,
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "details fetch failed, using cache");
                self.session
                    .store()
                    .conversations()
                    .get_by_id(conversation_id.as_str())
                    .await
                    .ok()
                    .flatten()?
            }
        };

        let users = self.remote_users(conversation.participants.iter()).await;
        let ids = [conversation.id.clone()];
        let lookups = RelatedLookups::default()
            .with_users(users)
            .with_labels(labels_by_conversation(
                &self.local_links(&ids).await,
                &self.local_labels().await,
            ));
        Some(compose_conversation_details(conversation, self.me(), &lookups))
    }

    // -----------------------------------------------------------------------
    // Lookups. Remote lookups fall back to the cache; cache lookups fall
    // back to empty.
    // -----------------------------------------------------------------------

    async fn local_users(&self) -> Vec<User> {
        self.session.store().users().get_all().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read cached users");
            Vec::new()
        })
    }

    async fn local_labels(&self) -> Vec<Label> {
        self.session.store().labels().get_all().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read cached labels");
            Vec::new()
        })
    }

    async fn local_links(&self, ids: &[ConversationId]) -> Vec<ConversationLabel> {
        let collection = self.session.store().conversation_labels();
        let mut links = Vec::new();
        for id in ids {
            match collection.for_conversation(id).await {
                Ok(mut found) => links.append(&mut found),
                Err(e) => warn!(conversation = %id, error = %e, "failed to read cached labels"),
            }
        }
        links
    }

    async fn local_unread_counts(&self, ids: &[ConversationId]) -> HashMap<ConversationId, usize> {
        let mut messages = Vec::new();
        for id in ids {
            messages.extend(self.session.get_local_messages(id).await);
        }
        unread_counts(&messages, self.me())
    }

    async fn remote_users<'u>(&self, ids: impl Iterator<Item = &'u UserId>) -> Vec<User> {
        let ids: Vec<&str> = ids.map(UserId::as_str).collect();
        if ids.is_empty() {
            return Vec::new();
        }

        match self
            .session
            .remote()
            .fetch::<User>(Query::table(Table::Users).is_in("id", ids))
            .await
        {
            Ok(users) => {
                if let Err(e) = self.session.store().users().bulk_put(users.clone()).await {
                    warn!(error = %e, "failed to cache users");
                }
                users
            }
            Err(e) => {
                warn!(error = %e, "user lookup failed, using cache");
                self.local_users().await
            }
        }
    }

    async fn remote_labels(&self) -> Vec<Label> {
        match self
            .session
            .remote()
            .fetch::<Label>(Query::table(Table::Labels))
            .await
        {
            Ok(labels) => {
                if let Err(e) = self.session.store().labels().bulk_put(labels.clone()).await {
                    warn!(error = %e, "failed to cache labels");
                }
                labels
            }
            Err(e) => {
                warn!(error = %e, "label catalog fetch failed, using cache");
                self.local_labels().await
            }
        }
    }

    async fn remote_links(&self, ids: &[ConversationId]) -> Vec<ConversationLabel> {
        if ids.is_empty() {
            return Vec::new();
        }

        match self
            .session
            .remote()
            .fetch::<ConversationLabel>(
                Query::table(Table::ConversationLabels)
                    .is_in("conversation_id", ids.iter().map(ConversationId::as_str)),
            )
            .await
        {
            Ok(links) => {
                if let Err(e) = self
                    .session
                    .store()
                    .conversation_labels()
                    .bulk_put(links.clone())
                    .await
                {
                    warn!(error = %e, "failed to cache conversation labels");
                }
                links
            }
            Err(e) => {
                warn!(error = %e, "conversation label fetch failed, using cache");
                self.local_links(ids).await
            }
        }
    }

    async fn remote_unread_counts(&self, ids: &[ConversationId]) -> HashMap<ConversationId, usize> {
        let mut counts = HashMap::new();
        let mut missing = Vec::new();
        for id in ids {
            let counted = self
                .session
                .remote()
                .count(
                    Query::table(Table::Messages)
                        .eq("conversation_id", id.as_str())
                        .not_contains("read_by", [self.me().as_str()]),
                )
                .await;
            match counted {
                Ok(n) => {
                    counts.insert(id.clone(), n);
                }
                Err(e) => {
                    warn!(conversation = %id, error = %e, "unread count failed, using cache");
                    missing.push(id.clone());
                }
            }
        }
        if !missing.is_empty() {
            counts.extend(self.local_unread_counts(&missing).await);
        }
        counts
    }
}

fn user_map(users: Vec<User>) -> HashMap<UserId, User> {
    users.into_iter().map(|u| (u.id.clone(), u)).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future;

    use super::*;

    async fn collect<T: Default + Send + 'static>(
        local: impl Future<Output = Option<T>> + Send + 'static,
        remote: impl Future<Output = Option<T>> + Send + 'static,
    ) -> Vec<Snapshot<T>> {
        local_first(local, remote).collect().await
    }

    async fn later<T>(ms: u64, value: Option<T>) -> Option<T> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        value
    }

    #[tokio::test]
    async fn cached_then_fresh() {
        let out = collect(future::ready(Some(1)), later(20, Some(2))).await;
        assert_eq!(
            out,
            vec![
                Snapshot { source: Source::Local, data: 1 },
                Snapshot { source: Source::Remote, data: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn late_cache_is_dropped() {
        let out = collect(later(20, Some(1)), future::ready(Some(2))).await;
        assert_eq!(out, vec![Snapshot { source: Source::Remote, data: 2 }]);
    }

    #[tokio::test]
    async fn remote_failure_keeps_cache() {
        let out = collect(later(20, Some(1)), future::ready(None)).await;
        assert_eq!(out, vec![Snapshot { source: Source::Local, data: 1 }]);
    }

    #[tokio::test]
    async fn empty_everywhere_still_finishes() {
        let out = collect(future::ready(None::<Vec<u8>>), later(5, None)).await;
        assert_eq!(
            out,
            vec![Snapshot {
                source: Source::Local,
                data: Vec::new()
            }]
        );
    }

    #[tokio::test]
    async fn empty_cache_waits_for_remote() {
        let out = collect(future::ready(None), later(5, Some(vec![3u8]))).await;
        assert_eq!(
            out,
            vec![Snapshot {
                source: Source::Remote,
                data: vec![3]
            }]
        );
    }
}
