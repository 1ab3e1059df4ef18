//! Denormalized view models.
//!
//! Everything here is pure: raw entities plus lookup tables in, view models
//! out. No store, no network. A missing joined record is replaced by a
//! placeholder rather than reported.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use palaver_shared::constants::{
    UNKNOWN_PARTICIPANT_FULLNAME, UNKNOWN_PARTICIPANT_USERNAME, UNKNOWN_SENDER_FULLNAME,
};
use palaver_shared::{
    Conversation, ConversationId, ConversationLabel, Label, LabelId, Message, User, UserId,
};

/// Display data for one conversation participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantInfo {
    pub id: UserId,
    pub fullname: String,
    pub username: String,
    pub image: Option<String>,
    pub phone: Option<String>,
}

impl ParticipantInfo {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            fullname: user.fullname.clone(),
            username: user.username.clone(),
            image: user.image.clone(),
            phone: user.phone.clone(),
        }
    }

    /// Stand-in for a participant with no user record.
    pub fn placeholder(id: UserId) -> Self {
        Self {
            id,
            fullname: UNKNOWN_PARTICIPANT_FULLNAME.to_string(),
            username: UNKNOWN_PARTICIPANT_USERNAME.to_string(),
            image: None,
            phone: None,
        }
    }
}

/// A conversation list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants_info: Vec<ParticipantInfo>,
    pub labels: Vec<Label>,
    pub unread_count: usize,
}

/// Sender display data attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderInfo {
    pub fullname: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: SenderInfo,
}

/// Messages of one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayBucket {
    pub day: String,
    pub messages: Vec<MessageView>,
}

/// Everything a conversation needs joined onto it.
#[derive(Debug, Clone, Default)]
pub struct RelatedLookups {
    pub users: HashMap<UserId, User>,
    pub labels: HashMap<ConversationId, Vec<Label>>,
    pub unread_counts: HashMap<ConversationId, usize>,
}

impl RelatedLookups {
    pub fn with_users(mut self, users: impl IntoIterator<Item = User>) -> Self {
        self.users.extend(users.into_iter().map(|u| (u.id.clone(), u)));
        self
    }

    pub fn with_labels(mut self, labels: HashMap<ConversationId, Vec<Label>>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_unread_counts(mut self, counts: HashMap<ConversationId, usize>) -> Self {
        self.unread_counts = counts;
        self
    }
}

/// Participant info for `id`, or the placeholder.
pub fn participant_info(users: &HashMap<UserId, User>, id: &UserId) -> ParticipantInfo {
    users
        .get(id)
        .map(ParticipantInfo::from_user)
        .unwrap_or_else(|| ParticipantInfo::placeholder(id.clone()))
}

/// Per conversation, how many messages `me` has not read.
pub fn unread_counts(messages: &[Message], me: &UserId) -> HashMap<ConversationId, usize> {
    let mut counts = HashMap::new();
    for message in messages.iter().filter(|m| !m.is_read_by(me)) {
        *counts.entry(message.conversation_id.clone()).or_insert(0) += 1;
    }
    counts
}

/// Join associations with the catalog. Associations to unknown labels are
/// dropped.
pub fn labels_by_conversation(
    links: &[ConversationLabel],
    catalog: &[Label],
) -> HashMap<ConversationId, Vec<Label>> {
    let catalog: HashMap<&LabelId, &Label> = catalog.iter().map(|l| (&l.id, l)).collect();
    let mut joined: HashMap<ConversationId, Vec<Label>> = HashMap::new();
    for link in links {
        if let Some(label) = catalog.get(&link.label_id) {
            let labels = joined.entry(link.conversation_id.clone()).or_default();
            if !labels.iter().any(|l| l.id == label.id) {
                labels.push((*label).clone());
            }
        }
    }
    joined
}

fn compose(
    mut conversation: Conversation,
    participants_info: Vec<ParticipantInfo>,
    me: &UserId,
    lookups: &RelatedLookups,
) -> ConversationView {
    if !conversation.is_group {
        let partner = conversation
            .others(me)
            .next()
            .and_then(|id| lookups.users.get(id));
        if let Some(partner) = partner {
            conversation.title = partner.fullname.clone();
        }
    }

    ConversationView {
        labels: lookups
            .labels
            .get(&conversation.id)
            .cloned()
            .unwrap_or_default(),
        unread_count: lookups
            .unread_counts
            .get(&conversation.id)
            .copied()
            .unwrap_or(0),
        participants_info,
        conversation,
    }
}

/// One list entry: everyone but `me` as participant info, joined labels,
/// unread count, and for direct chats the partner's name as title.
pub fn compose_conversation(
    conversation: Conversation,
    me: &UserId,
    lookups: &RelatedLookups,
) -> ConversationView {
    let info = conversation
        .others(me)
        .map(|id| participant_info(&lookups.users, id))
        .collect();
    compose(conversation, info, me, lookups)
}

/// Chat header for one conversation: like [`compose_conversation`] but
/// with every participant, `me` included.
pub fn compose_conversation_details(
    conversation: Conversation,
    me: &UserId,
    lookups: &RelatedLookups,
) -> ConversationView {
    let info = conversation
        .participants
        .iter()
        .map(|id| participant_info(&lookups.users, id))
        .collect();
    compose(conversation, info, me, lookups)
}

/// The conversation list, newest preview first; conversations without a
/// preview go last.
pub fn compose_conversation_list(
    conversations: Vec<Conversation>,
    me: &UserId,
    lookups: &RelatedLookups,
) -> Vec<ConversationView> {
    let mut views: Vec<_> = conversations
        .into_iter()
        .map(|c| compose_conversation(c, me, lookups))
        .collect();
    views.sort_by(|a, b| {
        b.conversation
            .last_message_at
            .cmp(&a.conversation.last_message_at)
    });
    views
}

/// Join every message with its sender, in chronological order.
pub fn compose_message_list(
    mut messages: Vec<Message>,
    users: &HashMap<UserId, User>,
) -> Vec<MessageView> {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    messages
        .into_iter()
        .map(|message| {
            let sender = match users.get(&message.sender_id) {
                Some(user) => SenderInfo {
                    fullname: user.fullname.clone(),
                    image: user.image.clone(),
                },
                None => SenderInfo {
                    fullname: UNKNOWN_SENDER_FULLNAME.to_string(),
                    image: None,
                },
            };
            MessageView { message, sender }
        })
        .collect()
}

/// [`group_by_day_in`] for UTC days.
pub fn group_by_day(messages: Vec<MessageView>, format: &str) -> Vec<DayBucket> {
    group_by_day_in(messages, &Utc, format)
}

/// Bucket a chronologically ordered message list by calendar day in `tz`.
/// Bucket keys use the `chrono` `format`; order is preserved within and
/// across buckets.
pub fn group_by_day_in<Tz: TimeZone>(
    messages: Vec<MessageView>,
    tz: &Tz,
    format: &str,
) -> Vec<DayBucket>
where
    Tz::Offset: std::fmt::Display,
{
    let mut buckets: Vec<DayBucket> = Vec::new();
    for view in messages {
        let day = view
            .message
            .created_at
            .with_timezone(tz)
            .format(format)
            .to_string();
        match buckets.last_mut() {
            Some(bucket) if bucket.day == day => bucket.messages.push(view),
            _ => buckets.push(DayBucket {
                day,
                messages: vec![view],
            }),
        }
    }
    buckets
}

/// Conversation list search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    /// Case-insensitive text matched against title, last message and
    /// participant names; phone numbers match as typed.
    pub query: String,
    /// Keep only conversations carrying this label.
    pub label: Option<LabelId>,
}

impl ConversationFilter {
    pub fn matches(&self, view: &ConversationView) -> bool {
        self.matches_query(view) && self.matches_label(view)
    }

    fn matches_query(&self, view: &ConversationView) -> bool {
        let query = self.query.trim();
        if query.is_empty() {
            return true;
        }
        let needle = query.to_lowercase();
        let conversation = &view.conversation;

        conversation.title.to_lowercase().contains(&needle)
            || conversation
                .last_message
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains(&needle))
            || view.participants_info.iter().any(|p| {
                p.fullname.to_lowercase().contains(&needle)
                    || p.username.to_lowercase().contains(&needle)
                    || p.phone.as_deref().is_some_and(|phone| phone.contains(query))
            })
    }

    fn matches_label(&self, view: &ConversationView) -> bool {
        match &self.label {
            Some(label) => view.labels.iter().any(|l| &l.id == label),
            None => true,
        }
    }
}

pub fn filter_conversations(
    views: Vec<ConversationView>,
    filter: &ConversationFilter,
) -> Vec<ConversationView> {
    views.into_iter().filter(|v| filter.matches(v)).collect()
}
