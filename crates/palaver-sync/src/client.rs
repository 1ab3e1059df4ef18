//! Client lifecycle.
//!
//! [`ChatClient`] owns the pieces that outlive a login (configuration,
//! local cache, remote gateway, authenticator) and the optional
//! [`SyncSession`] that exists only while a user is authenticated.

use std::sync::Arc;

use tracing::{info, warn};

use palaver_remote::RemoteGateway;
use palaver_shared::{ConversationId, User, UserId};
use palaver_store::LocalStore;

use crate::auth::{Authenticator, NewAccount, RemoteAuthenticator};
use crate::compose::{group_by_day, DayBucket, MessageView};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reader::Reader;
use crate::realtime::{ConversationFeed, ConversationListWatcher};
use crate::session::{SyncReport, SyncSession};

pub struct ChatClient {
    config: SyncConfig,
    store: LocalStore,
    remote: Arc<dyn RemoteGateway>,
    auth: Arc<dyn Authenticator>,
    user: Option<User>,
    session: Option<SyncSession>,
    last_sync: Option<SyncReport>,
}

impl ChatClient {
    /// Build a logged-out client. The cache is opened lazily on first use.
    pub fn new(config: SyncConfig, remote: Arc<dyn RemoteGateway>) -> Result<Self> {
        let store = config.open_store()?;
        let auth = Arc::new(RemoteAuthenticator::new(remote.clone()));
        Ok(Self {
            config,
            store,
            remote,
            auth,
            user: None,
            session: None,
            last_sync: None,
        })
    }

    /// Replace the authenticator.
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Report of the bulk sync run at the last login.
    pub fn last_sync(&self) -> Option<&SyncReport> {
        self.last_sync.as_ref()
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<&SyncReport> {
        let user = self.auth.login(username, password).await?;
        Ok(self.begin(user).await)
    }

    pub async fn signup(&mut self, account: NewAccount) -> Result<&SyncReport> {
        let user = self.auth.signup(account).await?;
        Ok(self.begin(user).await)
    }

    /// Resume a remembered login. `Ok(None)` when the user no longer exists.
    pub async fn restore(&mut self, user_id: &UserId) -> Result<Option<&SyncReport>> {
        match self.auth.user_by_id(user_id).await? {
            Some(user) => Ok(Some(self.begin(user).await)),
            None => {
                warn!(user = %user_id, "remembered user not found");
                self.logout();
                Ok(None)
            }
        }
    }

    async fn begin(&mut self, user: User) -> &SyncReport {
        if self.session.is_some() {
            self.logout();
        }

        let session = SyncSession::new(user.id.clone(), self.store.clone(), self.remote.clone());
        let report = session.sync_user_data().await;
        info!(
            user = %user.id,
            complete = report.is_complete(),
            "session started"
        );

        self.user = Some(user);
        self.session = Some(session);
        self.last_sync.insert(report)
    }

    /// Discard the session. The cache is kept for the next login.
    pub fn logout(&mut self) {
        if let Some(user) = self.user.take() {
            info!(user = %user.id, "logged out");
        }
        self.session = None;
        self.last_sync = None;
    }

    pub fn session(&self) -> Result<&SyncSession> {
        self.session.as_ref().ok_or(SyncError::NotAuthenticated)
    }

    pub fn reader(&self) -> Result<Reader> {
        Ok(Reader::new(self.session()?.clone()))
    }

    /// Prepare a conversation for display: mark it read if configured and
    /// open its live feed if realtime is enabled.
    pub async fn open_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ConversationFeed>> {
        let session = self.session()?;

        if self.config.mark_read_on_open {
            if let Err(e) = session.mark_conversation_read(conversation_id).await {
                warn!(conversation = %conversation_id, error = %e, "mark read on open failed");
            }
        }

        if !self.config.realtime {
            return Ok(None);
        }
        let feed = ConversationFeed::open(
            session.clone(),
            conversation_id.clone(),
            self.config.mark_read_on_open,
        )
        .await?;
        Ok(Some(feed))
    }

    /// Live watcher for the conversation list, if realtime is enabled.
    pub async fn watch_conversation_list(&self) -> Result<Option<ConversationListWatcher>> {
        let session = self.session()?;
        if !self.config.realtime {
            return Ok(None);
        }
        Ok(Some(ConversationListWatcher::open(session.clone()).await?))
    }

    /// Bucket composed messages by day using the configured key format.
    pub fn group_by_day(&self, messages: Vec<MessageView>) -> Vec<DayBucket> {
        group_by_day(messages, &self.config.day_key_format)
    }

    /// Wipe the local cache. A live session keeps working and repopulates
    /// the cache from the remote on its next reads.
    pub async fn reset_local_store(&self) -> Result<()> {
        self.store.clear_all().await?;
        info!("local cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use palaver_remote::{MemoryGateway, Table};
    use palaver_store::Repository;

    use super::*;

    fn client(realtime: bool) -> (ChatClient, MemoryGateway) {
        let remote = MemoryGateway::new();
        remote
            .seed(
                Table::Users,
                [
                    json!({"id": "u1", "fullname": "Alice", "username": "alice", "gender": "female", "password": "pw"}),
                    json!({"id": "u2", "fullname": "Bob", "username": "bob", "gender": "male", "password": "pw"}),
                ],
            )
            .unwrap();
        remote
            .seed(
                Table::Conversations,
                [json!({"id": "c1", "title": "Chat", "is_group": false, "participants": ["u1", "u2"]})],
            )
            .unwrap();
        remote
            .seed(
                Table::Messages,
                [json!({
                    "id": "m1",
                    "conversation_id": "c1",
                    "sender_id": "u2",
                    "message": "hi",
                    "created_at": "2025-03-07T10:00:00.000000Z",
                    "read_by": ["u2"]
                })],
            )
            .unwrap();

        let config = SyncConfig {
            store_path: Some(":memory:".into()),
            realtime,
            ..SyncConfig::default()
        };
        let client = ChatClient::new(config, Arc::new(remote.clone())).unwrap();
        (client, remote)
    }

    #[tokio::test]
    async fn test_logged_out_client_has_no_session() {
        let (client, _) = client(true);
        assert!(matches!(client.session(), Err(SyncError::NotAuthenticated)));
        assert!(client.reader().is_err());
    }

    #[tokio::test]
    async fn test_login_syncs_once() {
        let (mut client, _) = client(true);
        let report = client.login("alice", "pw").await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.count(Table::Messages), Some(1));

        let session = client.session().unwrap();
        assert_eq!(session.user_id().as_str(), "u1");
        assert_eq!(session.get_local_conversations().await.len(), 1);

        client.logout();
        assert!(client.user().is_none());
        assert!(client.last_sync().is_none());
    }

    #[tokio::test]
    async fn test_bad_login_keeps_client_logged_out() {
        let (mut client, _) = client(true);
        assert!(matches!(
            client.login("alice", "wrong").await,
            Err(SyncError::InvalidCredentials)
        ));
        assert!(client.session().is_err());
    }

    #[tokio::test]
    async fn test_restore_unknown_user() {
        let (mut client, _) = client(true);
        assert!(client.restore(&"u-gone".into()).await.unwrap().is_none());
        assert!(client.restore(&"u2".into()).await.unwrap().is_some());
        assert_eq!(client.user().map(|u| u.fullname.as_str()), Some("Bob"));
    }

    #[tokio::test]
    async fn test_open_conversation_marks_read() {
        let (mut client, remote) = client(true);
        client.login("alice", "pw").await.unwrap();

        let feed = client.open_conversation(&"c1".into()).await.unwrap();
        assert!(feed.is_some());
        assert_eq!(remote.subscriber_count().unwrap(), 1);

        let rows = remote.rows(Table::Messages).unwrap();
        assert_eq!(rows[0]["read_by"], json!(["u2", "u1"]));

        drop(feed);
        assert_eq!(remote.subscriber_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_realtime_disabled() {
        let (mut client, remote) = client(false);
        client.login("alice", "pw").await.unwrap();
        assert!(client.open_conversation(&"c1".into()).await.unwrap().is_none());
        assert!(client.watch_conversation_list().await.unwrap().is_none());
        assert_eq!(remote.subscriber_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_local_store() {
        let (mut client, _) = client(true);
        client.login("alice", "pw").await.unwrap();
        client.reset_local_store().await.unwrap();

        let session = client.session().unwrap();
        assert!(session.store().messages().get_all().await.unwrap().is_empty());
    }
}
