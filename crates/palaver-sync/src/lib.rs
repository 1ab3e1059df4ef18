//! # palaver-sync
//!
//! Keeps the on-device cache consistent with the remote store and renders
//! views from whichever copy answers first.
//!
//! - [`SyncSession`]: write paths bound to one logged-in user (bulk
//!   pull-down, idempotent message merge, optimistic send, read receipts).
//! - [`Reader`]: local-first read streams that yield a cached snapshot and
//!   then a fresh one.
//! - [`compose`]: pure joins from raw records to display views.
//! - [`realtime`]: live feeds over remote change subscriptions.
//! - [`ChatClient`]: login/logout lifecycle around all of the above.

pub mod auth;
pub mod client;
pub mod compose;
pub mod config;
pub mod reader;
pub mod realtime;
pub mod session;

mod error;

pub use auth::{Authenticator, NewAccount, RemoteAuthenticator};
pub use client::ChatClient;
pub use compose::{ConversationFilter, ConversationView, DayBucket, MessageView};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use reader::{local_first, Reader, Snapshot, Source};
pub use realtime::{ConversationFeed, ConversationListWatcher, ListChange};
pub use session::{SyncReport, SyncSession};
