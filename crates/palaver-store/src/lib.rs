//! # palaver-store
//!
//! The on-device cache for Palaver, backed by SQLite.
//!
//! A [`LocalStore`] owns one lazily opened connection and hands out typed
//! [`Collection`]s for users, conversations, messages, labels and
//! conversation/label associations. All collections share the
//! [`Repository`] operation set; each adds the few atomic helpers the sync
//! layer needs (`insert_new`, `add_reader`, `apply_last_message`, ...).
//! Queries run on the blocking pool so callers stay fully async.

pub mod conversations;
pub mod database;
pub mod labels;
pub mod messages;
pub mod migrations;
pub mod repository;
pub mod users;

mod error;

pub use conversations::ConversationIndex;
pub use database::LocalStore;
pub use error::{Result, StoreError};
pub use labels::{ConversationLabelIndex, LabelIndex};
pub use messages::MessageIndex;
pub use repository::{Collection, Record, Repository};
pub use users::UserIndex;
