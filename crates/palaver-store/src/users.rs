//! The `users` collection.

use rusqlite::types::Value;
use rusqlite::Row;

use palaver_shared::User;

use crate::error::Result;
use crate::repository::{opt_text, text, Collection, Record, Repository};

/// Secondary indexes on `users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserIndex {
    Username,
}

impl Record for User {
    type Index = UserIndex;

    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "fullname", "username", "gender", "image", "phone"];

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn index_column(index: UserIndex) -> &'static str {
        match index {
            UserIndex::Username => "username",
        }
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(self.key()),
            text(self.fullname.as_str()),
            text(self.username.as_str()),
            text(self.gender.as_str()),
            opt_text(self.image.as_deref()),
            opt_text(self.phone.as_deref()),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        Ok(User {
            id: id.into(),
            fullname: row.get(1)?,
            username: row.get(2)?,
            gender: row.get(3)?,
            image: row.get(4)?,
            phone: row.get(5)?,
        })
    }
}

impl Collection<User> {
    /// Look a user up by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let mut users = self.get_by_index(UserIndex::Username, username).await?;
        Ok(users.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalStore;

    fn user(id: &str, username: &str) -> User {
        User {
            id: id.into(),
            fullname: format!("{username} fullname"),
            username: username.into(),
            gender: "female".into(),
            image: None,
            phone: Some("555-0100".into()),
        }
    }

    #[tokio::test]
    async fn put_then_get_by_id() {
        let store = LocalStore::in_memory();
        let users = store.users();

        users.put(user("u1", "alice")).await.unwrap();
        let found = users.get_by_id("u1").await.unwrap().unwrap();
        assert_eq!(found, user("u1", "alice"));
        assert!(users.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let store = LocalStore::in_memory();
        let users = store.users();

        users.put(user("u1", "alice")).await.unwrap();
        let mut renamed = user("u1", "alice");
        renamed.fullname = "Alice Liddell".into();
        users.put(renamed).await.unwrap();

        let all = users.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fullname, "Alice Liddell");
    }

    #[tokio::test]
    async fn lookup_by_username_index() {
        let store = LocalStore::in_memory();
        let users = store.users();
        users
            .bulk_put(vec![user("u1", "alice"), user("u2", "bob")])
            .await
            .unwrap();

        let bob = users.find_by_username("bob").await.unwrap().unwrap();
        assert_eq!(bob.id.as_str(), "u2");
        assert!(users.find_by_username("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = LocalStore::in_memory();
        let users = store.users();
        users.put(user("u1", "alice")).await.unwrap();

        users.delete("u1").await.unwrap();
        users.delete("u1").await.unwrap();
        assert!(users.get_all().await.unwrap().is_empty());
    }
}
