//! # palaver-shared
//!
//! Types shared by every Palaver crate: id newtypes, the entity models that
//! travel between the remote store and the local cache, and timestamp
//! helpers.

pub mod constants;
pub mod models;
pub mod timestamp;
pub mod types;

pub use models::{Conversation, ConversationLabel, Label, Message, MessageRow, User};
pub use types::{ConversationId, LabelId, MessageId, UserId};
