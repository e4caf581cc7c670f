use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChainLink, Thought, ThoughtChain};

/// Kind of row change delivered over the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Thoughts,
    ThoughtChains,
    ChainLinks,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thoughts => "thoughts",
            Self::ThoughtChains => "thought_chains",
            Self::ChainLinks => "chain_links",
        }
    }
}

/// A full row of one of the three tables. Serialized as `{"table": .., "row": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum Row {
    Thoughts(Thought),
    ThoughtChains(ThoughtChain),
    ChainLinks(ChainLink),
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Self::Thoughts(_) => Table::Thoughts,
            Self::ThoughtChains(_) => Table::ThoughtChains,
            Self::ChainLinks(_) => Table::ChainLinks,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Thoughts(t) => t.id,
            Self::ThoughtChains(c) => c.id,
            Self::ChainLinks(l) => l.id,
        }
    }

    pub fn owner_id(&self) -> Uuid {
        match self {
            Self::Thoughts(t) => t.owner_id,
            Self::ThoughtChains(c) => c.owner_id,
            Self::ChainLinks(l) => l.owner_id,
        }
    }
}

/// Realtime change notification: `{"eventType": .., "table": .., "row": ..}`.
/// Delete events carry the row as it was before removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    #[serde(flatten)]
    pub row: Row,
}

impl ChangeEvent {
    pub fn new(event_type: ChangeKind, row: Row) -> Self {
        Self { event_type, row }
    }

    /// Every event is scoped to exactly one owner; the gateway routes on this.
    pub fn owner_id(&self) -> Uuid {
        self.row.owner_id()
    }

    pub fn table(&self) -> Table {
        self.row.table()
    }
}
