use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Ids are opaque strings owned by the remote store. Messages are the one
// entity a client mints ids for, so every id type can also generate a
// fresh UUID v4.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh, globally unique id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a [`User`](crate::models::User).
    UserId
);
string_id!(
    /// Identifier of a [`Conversation`](crate::models::Conversation).
    ConversationId
);
string_id!(
    /// Identifier of a [`Message`](crate::models::Message).
    MessageId
);
string_id!(
    /// Identifier of a [`Label`](crate::models::Label).
    LabelId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = UserId::from("u1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u1\"");

        let back: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }
}
