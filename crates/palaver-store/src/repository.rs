//! Typed repositories over the local collections.
//!
//! Every collection exposes the same operation set through [`Repository`].
//! The SQL is written once, generically, against the [`Record`] description
//! that each entity type provides; callers only ever name a typed
//! collection and a typed index, never a table string.

use std::marker::PhantomData;

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

use crate::database::LocalStore;
use crate::error::Result;

/// Describes how an entity maps onto its SQLite table.
pub trait Record: Clone + Send + Sync + Sized + 'static {
    /// Secondary indexes declared for this collection.
    type Index: Copy + Send + Sync + 'static;

    /// Table name.
    const TABLE: &'static str;

    /// Column list, primary key first.
    const COLUMNS: &'static [&'static str];

    /// Primary key value.
    fn key(&self) -> String;

    /// Column backing `index`.
    fn index_column(index: Self::Index) -> &'static str;

    /// Column values, in [`COLUMNS`](Self::COLUMNS) order.
    fn to_values(&self) -> Result<Vec<Value>>;

    /// Decode a row selected with [`COLUMNS`](Self::COLUMNS).
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// The operation set shared by every local collection.
#[async_trait]
pub trait Repository: Send + Sync {
    type Record;
    type Index;

    /// Every record in the collection, in no particular order.
    async fn get_all(&self) -> Result<Vec<Self::Record>>;

    /// Point lookup. A miss is `Ok(None)`.
    async fn get_by_id(&self, id: &str) -> Result<Option<Self::Record>>;

    /// All records whose indexed field equals `value`.
    async fn get_by_index(&self, index: Self::Index, value: &str) -> Result<Vec<Self::Record>>;

    /// Insert or replace by primary key.
    async fn put(&self, record: Self::Record) -> Result<()>;

    /// `put` every record as one transaction: either all land or none do.
    async fn bulk_put(&self, records: Vec<Self::Record>) -> Result<()>;

    /// Remove one record. Removing a missing key succeeds.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Remove every record.
    async fn clear(&self) -> Result<()>;
}

/// A typed handle on one collection of a [`LocalStore`].
pub struct Collection<R> {
    pub(crate) store: LocalStore,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Collection<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> Collection<R> {
    pub(crate) fn new(store: LocalStore) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Record> Repository for Collection<R> {
    type Record = R;
    type Index = R::Index;

    async fn get_all(&self) -> Result<Vec<R>> {
        self.store
            .with_conn(|conn| {
                let sql = format!("SELECT {} FROM {}", R::COLUMNS.join(", "), R::TABLE);
                query_records::<R, _>(conn, &sql, [])
            })
            .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<R>> {
        let id = id.to_string();
        self.store.with_conn(move |conn| select_by_key::<R>(conn, &id)).await
    }

    async fn get_by_index(&self, index: R::Index, value: &str) -> Result<Vec<R>> {
        let value = value.to_string();
        self.store
            .with_conn(move |conn| {
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    R::COLUMNS.join(", "),
                    R::TABLE,
                    R::index_column(index)
                );
                query_records::<R, _>(conn, &sql, params![value])
            })
            .await
    }

    async fn put(&self, record: R) -> Result<()> {
        self.store
            .with_conn(move |conn| upsert(conn, &record))
            .await
    }

    async fn bulk_put(&self, records: Vec<R>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let count = records.len();
        self.store
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                for record in &records {
                    upsert(&tx, record)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::debug!(table = R::TABLE, count, "bulk put committed");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.store
            .with_conn(move |conn| {
                let sql = format!("DELETE FROM {} WHERE {} = ?1", R::TABLE, R::COLUMNS[0]);
                conn.execute(&sql, params![id])?;
                Ok(())
            })
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.store
            .with_conn(|conn| {
                conn.execute(&format!("DELETE FROM {}", R::TABLE), [])?;
                Ok(())
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn upsert<R: Record>(conn: &Connection, record: &R) -> Result<()> {
    let placeholders = (1..=R::COLUMNS.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        R::TABLE,
        R::COLUMNS.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(record.to_values()?))?;
    Ok(())
}

pub(crate) fn select_by_key<R: Record>(conn: &Connection, key: &str) -> Result<Option<R>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        R::COLUMNS.join(", "),
        R::TABLE,
        R::COLUMNS[0]
    );
    let mut records = query_records::<R, _>(conn, &sql, params![key])?;
    Ok(records.pop())
}

pub(crate) fn query_records<R: Record, P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<R>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, R::from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Decode a JSON array column, reporting failures against `idx`.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Decode a stored timestamp, reporting failures against `idx`.
pub(crate) fn timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(idx)?;
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Decode a nullable stored timestamp, reporting failures against `idx`.
pub(crate) fn opt_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(_) => timestamp_column(row, idx).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub(crate) fn opt_text(value: Option<impl Into<String>>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.into()))
}
