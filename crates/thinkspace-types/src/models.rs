use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored lifecycle state of a thought. Deletion is removal, not a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtState {
    /// The owner's "currently being written" slot.
    Active,
    /// Committed, timestamped record. Content is frozen.
    Anchored,
}

impl ThoughtState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Anchored => "anchored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "anchored" => Some(Self::Anchored),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thought {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub content: String,
    pub state: ThoughtState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Temporal identity of the thought. Set once, on first anchor.
    pub anchored_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub display_label: Option<String>,
    #[serde(default)]
    pub chain_id: Option<Uuid>,
    /// The anchored thought this row supersedes, when it came from an edit.
    #[serde(default)]
    pub edited_from_id: Option<Uuid>,
}

impl Thought {
    /// A fresh, empty draft with a client-generated id.
    pub fn draft(owner_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            content: String::new(),
            state: ThoughtState::Active,
            created_at: now,
            updated_at: now,
            anchored_at: None,
            display_label: None,
            chain_id: None,
            edited_from_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ThoughtState::Active
    }

    pub fn is_anchored(&self) -> bool {
        self.state == ThoughtState::Anchored
    }

    /// Whitespace-only content counts as empty.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// The instant used for timeline ordering.
    pub fn timeline_at(&self) -> DateTime<Utc> {
        self.anchored_at.unwrap_or(self.created_at)
    }

    /// Display bucket only. Never use this for ordering.
    pub fn day_key(&self) -> NaiveDate {
        self.timeline_at().date_naive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtChain {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub first_thought_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub display_label: Option<String>,
    #[serde(default)]
    pub diverged_from_chain_id: Option<Uuid>,
    #[serde(default)]
    pub diverged_at_thought_id: Option<Uuid>,
}

impl ThoughtChain {
    pub fn new(owner_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            created_at: now,
            updated_at: now,
            first_thought_at: None,
            display_label: None,
            diverged_from_chain_id: None,
            diverged_at_thought_id: None,
        }
    }

    /// Chains created by a break carry provenance.
    pub fn is_branch(&self) -> bool {
        self.diverged_from_chain_id.is_some()
    }
}

/// Undirected association between two chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub from_chain_id: Uuid,
    pub to_chain_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ChainLink {
    pub fn new(owner_id: Uuid, from_chain_id: Uuid, to_chain_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            from_chain_id,
            to_chain_id,
            created_at: now,
        }
    }

    /// The endpoints in a direction-independent order, for duplicate checks.
    pub fn pair(&self) -> (Uuid, Uuid) {
        normalized_pair(self.from_chain_id, self.to_chain_id)
    }

    pub fn touches(&self, chain_id: Uuid) -> bool {
        self.from_chain_id == chain_id || self.to_chain_id == chain_id
    }

    /// The endpoint opposite `chain_id`, if this link touches it.
    pub fn other_end(&self, chain_id: Uuid) -> Option<Uuid> {
        if self.from_chain_id == chain_id {
            Some(self.to_chain_id)
        } else if self.to_chain_id == chain_id {
            Some(self.from_chain_id)
        } else {
            None
        }
    }
}

pub fn normalized_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_key_prefers_anchor_time() {
        let owner = Uuid::new_v4();
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 0).unwrap();
        let mut thought = Thought::draft(owner, created);
        assert_eq!(thought.day_key(), created.date_naive());

        let anchored = Utc.with_ymd_and_hms(2025, 3, 2, 0, 1, 0).unwrap();
        thought.anchored_at = Some(anchored);
        assert_eq!(thought.day_key(), anchored.date_naive());
    }

    #[test]
    fn test_link_pair_is_direction_independent() {
        let owner = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let forward = ChainLink::new(owner, a, b, now);
        let backward = ChainLink::new(owner, b, a, now);
        assert_eq!(forward.pair(), backward.pair());
        assert_eq!(forward.other_end(a), Some(b));
        assert_eq!(forward.other_end(Uuid::new_v4()), None);
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(serde_json::to_string(&ThoughtState::Anchored).unwrap(), "\"anchored\"");
        assert_eq!(ThoughtState::parse("active"), Some(ThoughtState::Active));
        assert_eq!(ThoughtState::parse("deleted"), None);
    }
}
