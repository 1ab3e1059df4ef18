//! Entity models mirrored between the remote store and the local cache.
//!
//! Field names match the remote table columns so rows decode directly with
//! `serde_json`. Messages are append-only: only `read_by` ever changes after
//! creation, and it only grows.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::timestamp::{self, parse_timestamp};
use crate::types::{ConversationId, LabelId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user profile. Owned by the remote store, cached locally for joins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub fullname: String,
    pub username: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A direct or group conversation.
///
/// `last_message` / `last_message_at` are a denormalized preview of the
/// newest message observed for the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default, deserialize_with = "unique_participants")]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(
        default,
        serialize_with = "timestamp::serialize_storage_opt",
        deserialize_with = "timestamp::deserialize_lenient"
    )]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creator_id: Option<UserId>,
}

impl Conversation {
    /// A two-party conversation between `creator` and `other`.
    pub fn direct(title: impl Into<String>, creator: UserId, other: UserId) -> Self {
        Self {
            id: ConversationId::generate(),
            title: title.into(),
            is_group: false,
            participants: dedup_preserving_order(vec![creator.clone(), other]),
            last_message: None,
            last_message_at: None,
            creator_id: Some(creator),
        }
    }

    /// A group conversation. The creator is always the first participant.
    pub fn group(title: impl Into<String>, creator: UserId, members: Vec<UserId>) -> Self {
        let mut participants = Vec::with_capacity(members.len() + 1);
        participants.push(creator.clone());
        participants.extend(members);

        Self {
            id: ConversationId::generate(),
            title: title.into(),
            is_group: true,
            participants: dedup_preserving_order(participants),
            last_message: None,
            last_message_at: None,
            creator_id: Some(creator),
        }
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// Participants other than `me`, in stored order.
    pub fn others<'a>(&'a self, me: &'a UserId) -> impl Iterator<Item = &'a UserId> + 'a {
        self.participants.iter().filter(move |id| *id != me)
    }

    /// Fold `message` into the cached preview if it is at least as new as
    /// what is cached. Returns whether the preview changed.
    pub fn apply_message(&mut self, message: &Message) -> bool {
        let newer = match self.last_message_at {
            Some(cached) => message.created_at >= cached,
            None => true,
        };
        if newer {
            self.last_message = Some(message.message.clone());
            self.last_message_at = Some(message.created_at);
        }
        newer
    }

    /// Keep `local`'s preview when it is strictly newer than ours.
    pub fn keep_newer_preview(&mut self, local: &Conversation) {
        if local.last_message_at > self.last_message_at {
            self.last_message = local.last_message.clone();
            self.last_message_at = local.last_message_at;
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message as held in the local cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub message: String,
    #[serde(serialize_with = "timestamp::serialize_storage")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
}

impl Message {
    /// Author a new message with a client-generated id. The sender has
    /// always read their own message.
    pub fn compose(
        conversation_id: ConversationId,
        sender_id: UserId,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut read_by = BTreeSet::new();
        read_by.insert(sender_id.clone());

        Self {
            id: MessageId::generate(),
            conversation_id,
            sender_id,
            message: text.into(),
            created_at,
            read_by,
        }
    }

    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.read_by.contains(user)
    }

    /// Add `user` to `read_by`. Returns `false` if already present.
    pub fn mark_read_by(&mut self, user: &UserId) -> bool {
        self.read_by.insert(user.clone())
    }
}

/// A message as it arrives from the remote store: `created_at` may be
/// missing or malformed and `read_by` may be null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: Option<serde_json::Value>,
    #[serde(default)]
    pub read_by: Option<Vec<UserId>>,
}

impl MessageRow {
    /// Turn a raw row into a cacheable [`Message`], stamping `now` when the
    /// timestamp cannot be used and making sure the sender is a reader.
    pub fn normalize(self, now: DateTime<Utc>) -> Message {
        let created_at = self
            .created_at
            .as_ref()
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp)
            .unwrap_or(now);

        let mut read_by: BTreeSet<UserId> = self.read_by.unwrap_or_default().into_iter().collect();
        read_by.insert(self.sender_id.clone());

        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            message: self.message,
            created_at,
            read_by,
        }
    }
}

impl From<Message> for MessageRow {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            sender_id: m.sender_id,
            message: m.message,
            created_at: Some(serde_json::Value::String(timestamp::to_storage_string(
                &m.created_at,
            ))),
            read_by: Some(m.read_by.into_iter().collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// An entry of the global label catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Association of a label with a conversation. Unique per pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationLabel {
    #[serde(default)]
    pub id: String,
    pub conversation_id: ConversationId,
    pub label_id: LabelId,
}

impl ConversationLabel {
    /// Primary key: the remote row id, or the pair itself for rows that
    /// were projected without one.
    pub fn key(&self) -> String {
        if self.id.is_empty() {
            format!("{}:{}", self.conversation_id, self.label_id)
        } else {
            self.id.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedup_preserving_order(ids: Vec<UserId>) -> Vec<UserId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn unique_participants<'de, D>(deserializer: D) -> Result<Vec<UserId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<UserId>>::deserialize(deserializer)?;
    Ok(dedup_preserving_order(raw.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, h, 0, 0).unwrap()
    }

    #[test]
    fn test_composed_message_is_read_by_sender() {
        let m = Message::compose("c1".into(), "u1".into(), "hi", at(9));
        assert!(m.is_read_by(&UserId::from("u1")));
        assert_eq!(m.read_by.len(), 1);
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut m = Message::compose("c1".into(), "u1".into(), "hi", at(9));
        let reader = UserId::from("u2");
        assert!(m.mark_read_by(&reader));
        assert!(!m.mark_read_by(&reader));
        assert_eq!(m.read_by.len(), 2);
    }

    #[test]
    fn test_apply_message_never_goes_backwards() {
        let mut conv = Conversation::direct("t", "u1".into(), "u2".into());
        let newer = Message::compose(conv.id.clone(), "u1".into(), "newer", at(10));
        let older = Message::compose(conv.id.clone(), "u2".into(), "older", at(8));

        assert!(conv.apply_message(&newer));
        assert!(!conv.apply_message(&older));
        assert_eq!(conv.last_message.as_deref(), Some("newer"));
        assert_eq!(conv.last_message_at, Some(at(10)));

        // equal timestamps still win
        let tie = Message::compose(conv.id.clone(), "u2".into(), "tie", at(10));
        assert!(conv.apply_message(&tie));
        assert_eq!(conv.last_message.as_deref(), Some("tie"));
    }

    #[test]
    fn test_keep_newer_preview() {
        let mut remote = Conversation::direct("t", "u1".into(), "u2".into());
        remote.last_message = Some("remote".into());
        remote.last_message_at = Some(at(9));

        let mut local = remote.clone();
        local.last_message = Some("optimistic".into());
        local.last_message_at = Some(at(11));

        let mut merged = remote.clone();
        merged.keep_newer_preview(&local);
        assert_eq!(merged.last_message.as_deref(), Some("optimistic"));

        let mut stale_local = remote.clone();
        stale_local.last_message = Some("stale".into());
        stale_local.last_message_at = Some(at(7));
        let mut merged = remote.clone();
        merged.keep_newer_preview(&stale_local);
        assert_eq!(merged.last_message.as_deref(), Some("remote"));
    }

    #[test]
    fn test_conversation_decodes_remote_row() {
        let row = json!({
            "id": "c1",
            "created_at": "2025-03-07T08:00:00Z",
            "title": "Chat",
            "is_group": false,
            "participants": ["u1", "u2", "u1"],
            "last_message": null,
            "last_message_at": "garbage",
            "creator_id": "u1"
        });
        let conv: Conversation = serde_json::from_value(row).unwrap();
        assert_eq!(conv.participants, vec![UserId::from("u1"), UserId::from("u2")]);
        assert_eq!(conv.last_message_at, None);
    }

    #[test]
    fn test_group_puts_creator_first() {
        let conv = Conversation::group(
            "g",
            "me".into(),
            vec!["a".into(), "me".into(), "b".into()],
        );
        assert_eq!(
            conv.participants,
            vec![UserId::from("me"), UserId::from("a"), UserId::from("b")]
        );
        assert!(conv.is_group);
    }

    #[test]
    fn test_normalize_stamps_missing_timestamp() {
        let now = at(12);
        let row: MessageRow = serde_json::from_value(json!({
            "id": "m1",
            "conversation_id": "c1",
            "sender_id": "u1",
            "message": "hey",
            "read_by": null
        }))
        .unwrap();
        let m = row.normalize(now);
        assert_eq!(m.created_at, now);
        assert!(m.is_read_by(&UserId::from("u1")));

        let row: MessageRow = serde_json::from_value(json!({
            "id": "m2",
            "conversation_id": "c1",
            "sender_id": "u1",
            "message": "hey",
            "created_at": "yesterday-ish",
            "read_by": ["u2"]
        }))
        .unwrap();
        let m = row.normalize(now);
        assert_eq!(m.created_at, now);
        assert_eq!(m.read_by.len(), 2);
    }

    #[test]
    fn test_normalize_keeps_valid_timestamp() {
        let row = MessageRow::from(Message::compose("c1".into(), "u1".into(), "x", at(6)));
        assert_eq!(row.normalize(at(12)).created_at, at(6));
    }

    #[test]
    fn test_conversation_label_key_falls_back_to_pair() {
        let link = ConversationLabel {
            id: String::new(),
            conversation_id: "c1".into(),
            label_id: "l1".into(),
        };
        assert_eq!(link.key(), "c1:l1");
    }
}
