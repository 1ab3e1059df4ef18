//! Realtime change events and subscription handles.
//!
//! Every subscription is its own channel. Events within one channel arrive
//! in the order the remote emitted them; nothing is promised across
//! channels. A [`Subscription`] is a [`Stream`] and releases its channel
//! when dropped or explicitly unsubscribed.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::query::{Filter, Table};

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// Which change types a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    /// `*`
    All,
}

impl EventKind {
    pub fn accepts(&self, change: ChangeType) -> bool {
        matches!(
            (self, change),
            (EventKind::All, _)
                | (EventKind::Insert, ChangeType::Insert)
                | (EventKind::Update, ChangeType::Update)
                | (EventKind::Delete, ChangeType::Delete)
        )
    }
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeType,
    pub table: Table,
    pub new_row: Option<Value>,
    pub old_row: Option<Value>,
}

impl ChangeEvent {
    /// Decode the post-change row, if the event carries one.
    pub fn decode_new<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        decode(self.new_row.as_ref())
    }

    /// Decode the pre-change row, if the event carries one.
    pub fn decode_old<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        decode(self.old_row.as_ref())
    }
}

fn decode<T: DeserializeOwned>(row: Option<&Value>) -> Result<Option<T>> {
    match row {
        Some(row) => Ok(Some(serde_json::from_value(row.clone())?)),
        None => Ok(None),
    }
}

/// What a subscriber listens to: a table, a change type and an optional
/// row filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    pub table: Table,
    pub event: EventKind,
    pub filter: Option<Filter>,
}

impl SubscriptionSpec {
    pub fn new(table: Table, event: EventKind) -> Self {
        Self {
            table,
            event,
            filter: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Whether `event` should be delivered on this channel. The row filter
    /// is checked against the new row, or the old row for deletes.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.event.accepts(event.event_type) {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        event
            .new_row
            .as_ref()
            .or(event.old_row.as_ref())
            .is_some_and(|row| filter.matches(row))
    }
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A live realtime channel.
pub struct Subscription {
    id: u64,
    spec: SubscriptionSpec,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    release: Option<Release>,
}

impl Subscription {
    /// Wrap a receiver. `release` runs exactly once, on unsubscribe or drop.
    pub fn new(
        id: u64,
        spec: SubscriptionSpec,
        receiver: mpsc::UnboundedReceiver<ChangeEvent>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            spec,
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    /// Next event, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Release the channel. Events still buffered are discarded.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.receiver.close();
        if let Some(release) = self.release.take() {
            tracing::debug!(subscription = self.id, table = %self.spec.table, "releasing channel");
            release();
        }
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChangeEvent>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    fn insert(table: Table, row: Value) -> ChangeEvent {
        ChangeEvent {
            event_type: ChangeType::Insert,
            table,
            new_row: Some(row),
            old_row: None,
        }
    }

    #[test]
    fn spec_matches_table_kind_and_filter() {
        let spec = SubscriptionSpec::new(Table::Messages, EventKind::Insert)
            .filter(Filter::eq("conversation_id", "c1"));

        assert!(spec.matches(&insert(Table::Messages, json!({"conversation_id": "c1"}))));
        assert!(!spec.matches(&insert(Table::Messages, json!({"conversation_id": "c2"}))));
        assert!(!spec.matches(&insert(Table::Users, json!({"conversation_id": "c1"}))));

        let mut update = insert(Table::Messages, json!({"conversation_id": "c1"}));
        update.event_type = ChangeType::Update;
        assert!(!spec.matches(&update));
        assert!(SubscriptionSpec::new(Table::Messages, EventKind::All).matches(&update));
    }

    #[test]
    fn change_type_wire_names() {
        assert_eq!(serde_json::to_value(ChangeType::Delete).unwrap(), json!("DELETE"));
    }

    #[tokio::test]
    async fn stream_yields_in_order_and_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = released.clone();
        let mut sub = Subscription::new(
            7,
            SubscriptionSpec::new(Table::Messages, EventKind::All),
            rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        for i in 0..3 {
            tx.send(insert(Table::Messages, json!({ "id": i }))).unwrap();
        }
        for i in 0..3 {
            let event = sub.next().await.unwrap();
            assert_eq!(event.new_row, Some(json!({ "id": i })));
        }

        sub.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.send(insert(Table::Messages, json!({}))).is_err());
    }

    #[test]
    fn decode_typed_rows() {
        #[derive(Deserialize)]
        struct Row {
            id: String,
        }
        let event = insert(Table::Users, json!({"id": "u1"}));
        let row: Row = event.decode_new().unwrap().unwrap();
        assert_eq!(row.id, "u1");
        assert!(event.decode_old::<Row>().unwrap().is_none());
    }
}
