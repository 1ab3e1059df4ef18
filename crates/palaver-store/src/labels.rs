//! The label catalog and its conversation associations.

use rusqlite::types::Value;
use rusqlite::{params, Row};

use palaver_shared::{ConversationId, ConversationLabel, Label, LabelId};

use crate::error::Result;
use crate::repository::{query_records, text, Collection, Record};

/// Secondary indexes on `labels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelIndex {
    Name,
}

impl Record for Label {
    type Index = LabelIndex;

    const TABLE: &'static str = "labels";
    const COLUMNS: &'static [&'static str] = &["id", "name", "color"];

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn index_column(index: LabelIndex) -> &'static str {
        match index {
            LabelIndex::Name => "name",
        }
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(self.key()),
            text(self.name.as_str()),
            text(self.color.as_str()),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        Ok(Label {
            id: id.into(),
            name: row.get(1)?,
            color: row.get(2)?,
        })
    }
}

/// Secondary indexes on `conversation_labels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationLabelIndex {
    ConversationId,
    LabelId,
}

impl Record for ConversationLabel {
    type Index = ConversationLabelIndex;

    const TABLE: &'static str = "conversation_labels";
    const COLUMNS: &'static [&'static str] = &["id", "conversation_id", "label_id"];

    fn key(&self) -> String {
        ConversationLabel::key(self)
    }

    fn index_column(index: ConversationLabelIndex) -> &'static str {
        match index {
            ConversationLabelIndex::ConversationId => "conversation_id",
            ConversationLabelIndex::LabelId => "label_id",
        }
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(Record::key(self)),
            text(self.conversation_id.as_str()),
            text(self.label_id.as_str()),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let conversation_id: String = row.get(1)?;
        let label_id: String = row.get(2)?;
        Ok(ConversationLabel {
            id: row.get(0)?,
            conversation_id: conversation_id.into(),
            label_id: label_id.into(),
        })
    }
}

impl Collection<ConversationLabel> {
    /// Associations of one conversation.
    pub async fn for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ConversationLabel>> {
        let conversation_id = conversation_id.to_string();
        self.store
            .with_conn(move |conn| {
                query_records::<ConversationLabel, _>(
                    conn,
                    "SELECT id, conversation_id, label_id
                     FROM conversation_labels
                     WHERE conversation_id = ?1",
                    params![conversation_id],
                )
            })
            .await
    }

    /// Drop the association of `label_id` with `conversation_id`, whatever
    /// its row id. Returns whether a row was removed.
    pub async fn remove_pair(
        &self,
        conversation_id: &ConversationId,
        label_id: &LabelId,
    ) -> Result<bool> {
        let conversation_id = conversation_id.to_string();
        let label_id = label_id.to_string();
        self.store
            .with_conn(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM conversation_labels WHERE conversation_id = ?1 AND label_id = ?2",
                    params![conversation_id, label_id],
                )?;
                Ok(removed > 0)
            })
            .await
    }
}
