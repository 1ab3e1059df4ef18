//! In-process [`RemoteGateway`].
//!
//! Behaves like the hosted store as far as the client can observe: inserts
//! get a generated `id` and a `created_at` stamp when none is supplied,
//! primary keys and label pairs are unique, and every write is broadcast to
//! the matching realtime channels in commit order. Tables can be switched
//! offline to exercise failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use palaver_shared::timestamp::to_storage_string;

use crate::error::{RemoteError, Result};
use crate::events::{ChangeEvent, ChangeType, Subscription, SubscriptionSpec};
use crate::gateway::RemoteGateway;
use crate::query::{Filter, Query, Table};

#[derive(Default)]
struct State {
    tables: HashMap<Table, Vec<Value>>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
    offline: HashSet<Table>,
}

struct Subscriber {
    id: u64,
    spec: SubscriptionSpec,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl State {
    fn ensure_online(&self, table: Table) -> Result<()> {
        if self.offline.contains(&table) {
            return Err(RemoteError::Network(format!("{table} is unreachable")));
        }
        Ok(())
    }

    fn rows(&self, table: Table) -> &[Value] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Deliver `event` to every matching channel, pruning closed ones.
    fn broadcast(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|sub| {
            if sub.sender.is_closed() {
                return false;
            }
            if sub.spec.matches(&event) {
                return sub.sender.send(event.clone()).is_ok();
            }
            true
        });
    }
}

/// Shared, cloneable in-memory remote store.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<State>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Network("gateway state poisoned".into()))
    }

    /// Load rows as-is, without defaults, constraints or events.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Value>) -> Result<()> {
        let mut state = self.lock()?;
        state.tables.entry(table).or_default().extend(rows);
        Ok(())
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, table: Table) -> Result<Vec<Value>> {
        Ok(self.lock()?.rows(table).to_vec())
    }

    /// Make every operation on `table` fail with a network error.
    pub fn take_offline(&self, table: Table) -> Result<()> {
        warn!(%table, "table taken offline");
        self.lock()?.offline.insert(table);
        Ok(())
    }

    pub fn bring_online(&self, table: Table) -> Result<()> {
        self.lock()?.offline.remove(&table);
        Ok(())
    }

    /// Number of live realtime channels.
    pub fn subscriber_count(&self) -> Result<usize> {
        let state = self.lock()?;
        Ok(state
            .subscribers
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count())
    }
}

fn fill_defaults(table: Table, row: Value) -> Result<Map<String, Value>> {
    let Value::Object(mut object) = row else {
        return Err(RemoteError::Constraint(format!(
            "{table}: row must be a JSON object"
        )));
    };

    if object.get("id").map_or(true, Value::is_null) {
        object.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
    }
    if object.get("created_at").map_or(true, Value::is_null) {
        object.insert(
            "created_at".into(),
            Value::String(to_storage_string(&Utc::now())),
        );
    }
    Ok(object)
}

fn check_unique(state: &State, table: Table, row: &Map<String, Value>) -> Result<()> {
    let existing = state.rows(table);

    if existing.iter().any(|r| r.get("id") == row.get("id")) {
        return Err(RemoteError::Constraint(format!(
            "{table}: duplicate key {}",
            row.get("id").unwrap_or(&Value::Null)
        )));
    }

    if table == Table::ConversationLabels {
        let pair = (row.get("conversation_id"), row.get("label_id"));
        if existing
            .iter()
            .any(|r| (r.get("conversation_id"), r.get("label_id")) == pair)
        {
            return Err(RemoteError::Constraint(format!(
                "{table}: label already attached to conversation"
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn select(&self, query: Query) -> Result<Vec<Value>> {
        let state = self.lock()?;
        state.ensure_online(query.table)?;
        Ok(query.apply(state.rows(query.table)))
    }

    async fn count(&self, query: Query) -> Result<usize> {
        let state = self.lock()?;
        state.ensure_online(query.table)?;
        Ok(state
            .rows(query.table)
            .iter()
            .filter(|r| query.matches(r))
            .count())
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let mut state = self.lock()?;
        state.ensure_online(table)?;

        let object = fill_defaults(table, row)?;
        check_unique(&state, table, &object)?;

        let row = Value::Object(object);
        state.tables.entry(table).or_default().push(row.clone());
        debug!(%table, id = %row["id"], "row inserted");

        state.broadcast(ChangeEvent {
            event_type: ChangeType::Insert,
            table,
            new_row: Some(row.clone()),
            old_row: None,
        });
        Ok(row)
    }

    async fn update(&self, table: Table, patch: Value, filters: Vec<Filter>) -> Result<Vec<Value>> {
        let Value::Object(patch) = patch else {
            return Err(RemoteError::Constraint(format!(
                "{table}: patch must be a JSON object"
            )));
        };

        let mut state = self.lock()?;
        state.ensure_online(table)?;

        let mut changes = Vec::new();
        if let Some(rows) = state.tables.get_mut(&table) {
            for row in rows.iter_mut() {
                if !filters.iter().all(|f| f.matches(&*row)) {
                    continue;
                }
                let old = row.clone();
                if let Some(object) = row.as_object_mut() {
                    for (k, v) in &patch {
                        object.insert(k.clone(), v.clone());
                    }
                }
                changes.push((old, row.clone()));
            }
        }

        let mut updated = Vec::with_capacity(changes.len());
        for (old, new) in changes {
            state.broadcast(ChangeEvent {
                event_type: ChangeType::Update,
                table,
                new_row: Some(new.clone()),
                old_row: Some(old),
            });
            updated.push(new);
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<usize> {
        let mut state = self.lock()?;
        state.ensure_online(table)?;

        let mut removed = Vec::new();
        if let Some(rows) = state.tables.get_mut(&table) {
            let (gone, kept): (Vec<Value>, Vec<Value>) = std::mem::take(rows)
                .into_iter()
                .partition(|r| filters.iter().all(|f| f.matches(r)));
            *rows = kept;
            removed = gone;
        }

        let count = removed.len();
        for old in removed {
            state.broadcast(ChangeEvent {
                event_type: ChangeType::Delete,
                table,
                new_row: None,
                old_row: Some(old),
            });
        }
        Ok(count)
    }

    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<Subscription> {
        let mut state = self.lock()?;
        state.ensure_online(spec.table)?;

        let id = state.next_subscription;
        state.next_subscription += 1;

        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.push(Subscriber {
            id,
            spec: spec.clone(),
            sender,
        });
        debug!(subscription = id, table = %spec.table, "channel opened");

        let weak: Weak<Mutex<State>> = Arc::downgrade(&self.state);
        Ok(Subscription::new(id, spec, receiver, move || {
            if let Some(state) = weak.upgrade() {
                if let Ok(mut state) = state.lock() {
                    state.subscribers.retain(|s| s.id != id);
                }
            }
        }))
    }
}
