//! Database connection management.
//!
//! [`LocalStore`] is a cheap, cloneable handle. The SQLite connection behind
//! it is opened lazily by the first operation and memoized; opening runs the
//! schema migrations, so provisioning happens once per database file and is
//! skipped on every later open.
//!
//! rusqlite is synchronous, so every query runs on tokio's blocking pool
//! while the async caller is suspended at its await point.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use rusqlite::Connection;
use tokio::sync::OnceCell;

use palaver_shared::constants::DB_FILE_NAME;
use palaver_shared::{Conversation, ConversationLabel, Label, Message, User};

use crate::error::{Result, StoreError};
use crate::migrations;
use crate::repository::Collection;

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

struct Inner {
    location: Location,
    conn: OnceCell<Arc<Mutex<Connection>>>,
}

/// Handle to the per-installation local cache.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

impl LocalStore {
    /// The default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/palaver/palaver.db`
    /// - macOS:   `~/Library/Application Support/com.palaver.palaver/palaver.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\palaver\palaver\data\palaver.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "palaver", "palaver").ok_or(StoreError::NoDataDir)?;

        Ok(Self::at(project_dirs.data_dir().join(DB_FILE_NAME)))
    }

    /// A store backed by the file at `path`. Nothing is touched on disk until
    /// the first operation.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::with_location(Location::File(path.into()))
    }

    /// A throwaway store that lives as long as this handle and its clones.
    pub fn in_memory() -> Self {
        Self::with_location(Location::Memory)
    }

    fn with_location(location: Location) -> Self {
        Self {
            inner: Arc::new(Inner {
                location,
                conn: OnceCell::new(),
            }),
        }
    }

    /// Filesystem path of the database, if it is file-backed.
    pub fn path(&self) -> Option<&Path> {
        match &self.inner.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    pub fn users(&self) -> Collection<User> {
        Collection::new(self.clone())
    }

    pub fn conversations(&self) -> Collection<Conversation> {
        Collection::new(self.clone())
    }

    pub fn messages(&self) -> Collection<Message> {
        Collection::new(self.clone())
    }

    pub fn labels(&self) -> Collection<Label> {
        Collection::new(self.clone())
    }

    pub fn conversation_labels(&self) -> Collection<ConversationLabel> {
        Collection::new(self.clone())
    }

    /// Wipe every collection. Used by the reset/reseed flow; normal sync
    /// traffic never deletes anything.
    pub async fn clear_all(&self) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "DELETE FROM messages;
                 DELETE FROM conversations;
                 DELETE FROM users;
                 DELETE FROM conversation_labels;
                 DELETE FROM labels;",
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        tracing::info!("local store cleared");
        Ok(())
    }

    /// Schema version of the open database.
    pub async fn schema_version(&self) -> Result<u32> {
        self.with_conn(|conn| migrations::schema_version(conn)).await
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.connection().await?;
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }

    async fn connection(&self) -> Result<Arc<Mutex<Connection>>> {
        let conn = self
            .inner
            .conn
            .get_or_try_init(|| {
                let location = self.inner.location.clone();
                async move {
                    let conn = tokio::task::spawn_blocking(move || open(&location)).await??;
                    Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
                }
            })
            .await?;
        Ok(conn.clone())
    }
}

fn open(location: &Location) -> Result<Connection> {
    let mut conn = match location {
        Location::File(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            tracing::info!(path = %path.display(), "opening database");
            let conn = Connection::open(path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        }
        Location::Memory => {
            tracing::debug!("opening in-memory database");
            Connection::open_in_memory()?
        }
    };

    migrations::run_migrations(&mut conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Repository;

    #[tokio::test]
    async fn open_is_lazy_and_provisions_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let store = LocalStore::at(&path);
        assert!(!path.exists());

        assert_eq!(store.schema_version().await.unwrap(), migrations::CURRENT_VERSION);
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let store = LocalStore::at(&path);
            store
                .labels()
                .put(Label {
                    id: "l1".into(),
                    name: "Work".into(),
                    color: "#00ff00".into(),
                })
                .await
                .unwrap();
        }

        let store = LocalStore::at(&path);
        let label = store.labels().get_by_id("l1").await.unwrap();
        assert_eq!(label.map(|l| l.name), Some("Work".to_string()));
    }

    #[tokio::test]
    async fn open_failure_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the database file should be
        let store = LocalStore::at(dir.path());
        assert!(store.users().get_all().await.is_err());
    }

    #[tokio::test]
    async fn clear_all_empties_every_collection() {
        let store = LocalStore::in_memory();
        store
            .labels()
            .put(Label {
                id: "l1".into(),
                name: "Work".into(),
                color: String::new(),
            })
            .await
            .unwrap();

        store.clear_all().await.unwrap();
        assert!(store.labels().get_all().await.unwrap().is_empty());
    }
}
