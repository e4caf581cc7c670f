//! Database row types. These map directly to SQLite rows and stay distinct
//! from the thinkspace-types models so the DB layer keeps its own encoding.

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use thinkspace_types::{ChainLink, Thought, ThoughtChain, ThoughtState};

/// What a single-row upsert did to the stored copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The stored row was as new or newer, or belongs to another owner.
    Ignored,
}

pub struct ThoughtRow {
    pub id: String,
    pub owner_id: String,
    pub content: String,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
    pub anchored_at: Option<String>,
    pub display_label: Option<String>,
    pub chain_id: Option<String>,
    pub edited_from_id: Option<String>,
}

pub struct ChainRow {
    pub id: String,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub first_thought_at: Option<String>,
    pub display_label: Option<String>,
    pub diverged_from_chain_id: Option<String>,
    pub diverged_at_thought_id: Option<String>,
}

pub struct LinkRow {
    pub id: String,
    pub owner_id: String,
    pub from_chain_id: String,
    pub to_chain_id: String,
    pub created_at: String,
}

/// Fixed-precision RFC3339 so stored timestamps also sort lexically.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone: "YYYY-MM-DD HH:MM:SS".
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().map_err(|e| anyhow!("Corrupt id '{}': {}", raw, e))
}

fn parse_opt_id(raw: Option<&str>) -> Result<Option<Uuid>> {
    raw.map(parse_id).transpose()
}

fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

impl ThoughtRow {
    pub fn from_model(t: &Thought) -> Self {
        Self {
            id: t.id.to_string(),
            owner_id: t.owner_id.to_string(),
            content: t.content.clone(),
            state: t.state.as_str().to_string(),
            created_at: format_ts(t.created_at),
            updated_at: format_ts(t.updated_at),
            anchored_at: t.anchored_at.map(format_ts),
            display_label: t.display_label.clone(),
            chain_id: t.chain_id.map(|id| id.to_string()),
            edited_from_id: t.edited_from_id.map(|id| id.to_string()),
        }
    }

    pub fn into_model(self) -> Result<Thought> {
        let state = ThoughtState::parse(&self.state)
            .ok_or_else(|| anyhow!("Corrupt state '{}' on thought '{}'", self.state, self.id))?;
        Ok(Thought {
            id: parse_id(&self.id)?,
            owner_id: parse_id(&self.owner_id)?,
            content: self.content,
            state,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            anchored_at: parse_opt_ts(self.anchored_at.as_deref())?,
            display_label: self.display_label,
            chain_id: parse_opt_id(self.chain_id.as_deref())?,
            edited_from_id: parse_opt_id(self.edited_from_id.as_deref())?,
        })
    }
}

impl ChainRow {
    pub fn from_model(c: &ThoughtChain) -> Self {
        Self {
            id: c.id.to_string(),
            owner_id: c.owner_id.to_string(),
            created_at: format_ts(c.created_at),
            updated_at: format_ts(c.updated_at),
            first_thought_at: c.first_thought_at.map(format_ts),
            display_label: c.display_label.clone(),
            diverged_from_chain_id: c.diverged_from_chain_id.map(|id| id.to_string()),
            diverged_at_thought_id: c.diverged_at_thought_id.map(|id| id.to_string()),
        }
    }

    pub fn into_model(self) -> Result<ThoughtChain> {
        Ok(ThoughtChain {
            id: parse_id(&self.id)?,
            owner_id: parse_id(&self.owner_id)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            first_thought_at: parse_opt_ts(self.first_thought_at.as_deref())?,
            display_label: self.display_label,
            diverged_from_chain_id: parse_opt_id(self.diverged_from_chain_id.as_deref())?,
            diverged_at_thought_id: parse_opt_id(self.diverged_at_thought_id.as_deref())?,
        })
    }
}

impl LinkRow {
    pub fn from_model(l: &ChainLink) -> Self {
        Self {
            id: l.id.to_string(),
            owner_id: l.owner_id.to_string(),
            from_chain_id: l.from_chain_id.to_string(),
            to_chain_id: l.to_chain_id.to_string(),
            created_at: format_ts(l.created_at),
        }
    }

    pub fn into_model(self) -> Result<ChainLink> {
        Ok(ChainLink {
            id: parse_id(&self.id)?,
            owner_id: parse_id(&self.owner_id)?,
            from_chain_id: parse_id(&self.from_chain_id)?,
            to_chain_id: parse_id(&self.to_chain_id)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}
