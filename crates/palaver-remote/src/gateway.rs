//! The remote store contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::events::{Subscription, SubscriptionSpec};
use crate::query::{Filter, Query, Table};

/// Query/subscribe client for the remote source of truth.
///
/// Implementations must be usable behind `Arc<dyn RemoteGateway>`.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Rows matching `query`.
    async fn select(&self, query: Query) -> Result<Vec<Value>>;

    /// Number of rows matching `query`. Projection, order and limit are
    /// ignored.
    async fn count(&self, query: Query) -> Result<usize>;

    /// Insert one row and return it as stored, with remote defaults filled in.
    async fn insert(&self, table: Table, row: Value) -> Result<Value>;

    /// Merge `patch` into every row matching all `filters`; returns the
    /// updated rows.
    async fn update(&self, table: Table, patch: Value, filters: Vec<Filter>) -> Result<Vec<Value>>;

    /// Delete every row matching all `filters`; returns how many went.
    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<usize>;

    /// Open a realtime channel.
    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<Subscription>;
}

/// Typed helpers on top of [`RemoteGateway`].
#[async_trait]
pub trait GatewayExt: RemoteGateway {
    /// Rows matching `query`, decoded as `T`. Rows that fail to decode are
    /// logged and skipped.
    async fn fetch<T>(&self, query: Query) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let table = query.table;
        let rows = self.select(query).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(%table, error = %e, "skipping undecodable row"),
            }
        }
        Ok(records)
    }

    /// First row matching `query`, decoded as `T`.
    async fn fetch_one<T>(&self, query: Query) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut rows = self.select(query.limit(1)).await?;
        match rows.pop() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    /// Serialize `record` and insert it.
    async fn insert_record<T>(&self, table: Table, record: &T) -> Result<Value>
    where
        T: Serialize + Sync,
    {
        let row = serde_json::to_value(record)?;
        self.insert(table, row).await
    }
}

impl<G: RemoteGateway + ?Sized> GatewayExt for G {}
