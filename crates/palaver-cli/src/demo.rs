//! Demo data for the in-process remote.

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use palaver_remote::{MemoryGateway, Table};
use palaver_shared::timestamp::to_storage_string;

pub const DEMO_PASSWORD: &str = "password123";

struct DemoIds {
    alice: String,
    bob: String,
    charlie: String,
}

/// Three users who all share [`DEMO_PASSWORD`], two direct chats, one
/// labelled group and a handful of messages.
pub fn seed(remote: &MemoryGateway) -> anyhow::Result<()> {
    let ids = DemoIds {
        alice: Uuid::new_v4().to_string(),
        bob: Uuid::new_v4().to_string(),
        charlie: Uuid::new_v4().to_string(),
    };

    remote.seed(
        Table::Users,
        [
            user(&ids.alice, "Alice Johnson", "alice", "female"),
            user(&ids.bob, "Bob Smith", "bob", "male"),
            user(&ids.charlie, "Charlie Brown", "charlie", "male"),
        ],
    )?;

    let now = Utc::now();
    let yesterday = now - Duration::days(1);
    let alice_bob = Uuid::new_v4().to_string();
    let bob_charlie = Uuid::new_v4().to_string();
    let team = Uuid::new_v4().to_string();

    remote.seed(
        Table::Conversations,
        [
            json!({
                "id": alice_bob,
                "title": "New Chat",
                "is_group": false,
                "participants": [ids.alice, ids.bob],
                "creator_id": ids.alice,
                "last_message": "Hey Alice!",
                "last_message_at": to_storage_string(&(now - Duration::minutes(5))),
            }),
            json!({
                "id": bob_charlie,
                "title": "New Chat",
                "is_group": false,
                "participants": [ids.bob, ids.charlie],
                "creator_id": ids.bob,
                "last_message": "Hello Bob!",
                "last_message_at": to_storage_string(&now),
            }),
            json!({
                "id": team,
                "title": "Weekend plans",
                "is_group": true,
                "participants": [ids.charlie, ids.alice, ids.bob],
                "creator_id": ids.charlie,
                "last_message": "Hiking on Saturday?",
                "last_message_at": to_storage_string(&(now - Duration::hours(3))),
            }),
        ],
    )?;

    let work = Uuid::new_v4().to_string();
    remote.seed(
        Table::Labels,
        [
            json!({"id": work, "name": "Work", "color": "#3b82f6"}),
            json!({"id": Uuid::new_v4().to_string(), "name": "Family", "color": "#22c55e"}),
        ],
    )?;
    remote.seed(
        Table::ConversationLabels,
        [json!({"id": Uuid::new_v4().to_string(), "conversation_id": team, "label_id": work})],
    )?;

    remote.seed(
        Table::Messages,
        [
            message(&alice_bob, &ids.alice, "Hey Bob!", yesterday, &[&ids.alice, &ids.bob]),
            message(
                &alice_bob,
                &ids.bob,
                "Hey Alice!",
                now - Duration::minutes(5),
                &[&ids.bob],
            ),
            message(&bob_charlie, &ids.bob, "Hi Charlie!", now - Duration::minutes(1), &[&ids.bob]),
            message(&bob_charlie, &ids.charlie, "Hello Bob!", now, &[&ids.charlie]),
            message(
                &team,
                &ids.charlie,
                "Hiking on Saturday?",
                now - Duration::hours(3),
                &[&ids.charlie],
            ),
        ],
    )?;

    Ok(())
}

fn user(id: &str, fullname: &str, username: &str, gender: &str) -> serde_json::Value {
    json!({
        "id": id,
        "fullname": fullname,
        "username": username,
        "password": DEMO_PASSWORD,
        "gender": gender,
        "image": null,
        "phone": null,
    })
}

fn message(
    conversation: &str,
    sender: &str,
    text: &str,
    at: chrono::DateTime<Utc>,
    read_by: &[&str],
) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "conversation_id": conversation,
        "sender_id": sender,
        "message": text,
        "created_at": to_storage_string(&at),
        "read_by": read_by,
    })
}
