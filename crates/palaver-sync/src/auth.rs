//! Credential checks against the remote `users` table.
//!
//! Authentication is a collaborator of the sync layer: it yields a user id
//! and profile, nothing more. Passwords are compared as stored; this layer
//! never keeps them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use palaver_remote::{GatewayExt, Query, RemoteGateway, Table};
use palaver_shared::{User, UserId};

use crate::error::{Result, SyncError};

/// Profile columns readable by clients.
const PROFILE_COLUMNS: &[&str] = &["id", "fullname", "username", "gender", "image", "phone"];

/// Registration form.
#[derive(Debug, Clone, Serialize)]
pub struct NewAccount {
    pub fullname: String,
    pub username: String,
    pub password: String,
    pub gender: String,
    pub phone: Option<String>,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve credentials to a user. Unknown username and wrong password
    /// both yield [`SyncError::InvalidCredentials`].
    async fn login(&self, username: &str, password: &str) -> Result<User>;

    /// Register a new user. Fails with [`SyncError::UsernameTaken`] when
    /// the username exists.
    async fn signup(&self, account: NewAccount) -> Result<User>;

    /// Profile of a previously authenticated user, `None` if it is gone.
    async fn user_by_id(&self, id: &UserId) -> Result<Option<User>>;
}

#[derive(Deserialize)]
struct CredentialRow {
    #[serde(flatten)]
    user: User,
    #[serde(default)]
    password: Option<String>,
}

/// [`Authenticator`] backed by the remote gateway.
#[derive(Clone)]
pub struct RemoteAuthenticator {
    remote: Arc<dyn RemoteGateway>,
}

impl RemoteAuthenticator {
    pub fn new(remote: Arc<dyn RemoteGateway>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Authenticator for RemoteAuthenticator {
    async fn login(&self, username: &str, password: &str) -> Result<User> {
        let row: Option<CredentialRow> = self
            .remote
            .fetch_one(Query::table(Table::Users).eq("username", username))
            .await?;

        match row {
            Some(row) if row.password.as_deref() == Some(password) => {
                info!(user = %row.user.id, "logged in");
                Ok(row.user)
            }
            _ => {
                warn!(username, "login rejected");
                Err(SyncError::InvalidCredentials)
            }
        }
    }

    async fn signup(&self, account: NewAccount) -> Result<User> {
        let existing = self
            .remote
            .count(Query::table(Table::Users).eq("username", account.username.as_str()))
            .await?;
        if existing > 0 {
            return Err(SyncError::UsernameTaken(account.username));
        }

        let row = self
            .remote
            .insert_record(Table::Users, &account)
            .await?;
        let user: User = serde_json::from_value(row).map_err(palaver_remote::RemoteError::from)?;
        info!(user = %user.id, username = %user.username, "account created");
        Ok(user)
    }

    async fn user_by_id(&self, id: &UserId) -> Result<Option<User>> {
        let user = self
            .remote
            .fetch_one(
                Query::table(Table::Users)
                    .select(PROFILE_COLUMNS)
                    .eq("id", id.as_str()),
            )
            .await?;
        Ok(user)
    }
}
