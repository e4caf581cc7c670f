use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use thinkspace_types::models::normalized_pair;
use thinkspace_types::{ChainLink, Thought, ThoughtChain};

use crate::Database;
use crate::models::{ChainRow, LinkRow, ThoughtRow, UpsertOutcome, format_ts};

/// Everything removed by a cascading chain delete.
#[derive(Debug, Default)]
pub struct ChainRemoval {
    pub chain: Option<ThoughtChain>,
    pub thoughts: Vec<Thought>,
    pub links: Vec<ChainLink>,
}

const THOUGHT_COLUMNS: &str = "id, owner_id, content, state, created_at, updated_at, anchored_at, display_label, chain_id, edited_from_id";
const CHAIN_COLUMNS: &str = "id, owner_id, created_at, updated_at, first_thought_at, display_label, diverged_from_chain_id, diverged_at_thought_id";
const LINK_COLUMNS: &str = "id, owner_id, from_chain_id, to_chain_id, created_at";

impl Database {
    // -- Thoughts --

    pub fn list_thoughts(&self, owner_id: Uuid) -> Result<Vec<Thought>> {
        self.with_conn(|conn| query_thoughts(conn, "owner_id = ?1", &owner_id.to_string()))
    }

    pub fn get_thought(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Thought>> {
        self.with_conn(|conn| query_thought(conn, owner_id, id))
    }

    /// Upsert a batch in one transaction. A row only replaces the stored copy
    /// when its `updated_at` is strictly newer.
    pub fn upsert_thoughts(&self, thoughts: &[Thought]) -> Result<Vec<UpsertOutcome>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut outcomes = Vec::with_capacity(thoughts.len());
            for thought in thoughts {
                outcomes.push(upsert_thought(&tx, thought)?);
            }
            tx.commit()?;
            Ok(outcomes)
        })
    }

    /// Returns the removed row, if there was one.
    pub fn delete_thought(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Thought>> {
        self.with_conn(|conn| {
            let existing = query_thought(conn, owner_id, id)?;
            if existing.is_some() {
                conn.execute(
                    "DELETE FROM thoughts WHERE id = ?1 AND owner_id = ?2",
                    params![id.to_string(), owner_id.to_string()],
                )?;
            }
            Ok(existing)
        })
    }

    // -- Chains --

    pub fn list_chains(&self, owner_id: Uuid) -> Result<Vec<ThoughtChain>> {
        self.with_conn(|conn| query_chains(conn, "owner_id = ?1", &owner_id.to_string()))
    }

    pub fn upsert_chains(&self, chains: &[ThoughtChain]) -> Result<Vec<UpsertOutcome>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut outcomes = Vec::with_capacity(chains.len());
            for chain in chains {
                outcomes.push(upsert_chain(&tx, chain)?);
            }
            tx.commit()?;
            Ok(outcomes)
        })
    }

    /// Delete a chain together with its thoughts and every link touching it.
    pub fn delete_chain(&self, owner_id: Uuid, id: Uuid) -> Result<ChainRemoval> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let owner = owner_id.to_string();
            let chain_id = id.to_string();

            let chain = query_chains(&tx, "owner_id = ?1", &owner)?
                .into_iter()
                .find(|c| c.id == id);
            if chain.is_none() {
                return Ok(ChainRemoval::default());
            }

            let thoughts: Vec<Thought> = query_thoughts(&tx, "chain_id = ?1", &chain_id)?
                .into_iter()
                .filter(|t| t.owner_id == owner_id)
                .collect();
            let links: Vec<ChainLink> = query_links(&tx, "owner_id = ?1", &owner)?
                .into_iter()
                .filter(|l| l.touches(id))
                .collect();

            tx.execute(
                "DELETE FROM thoughts WHERE chain_id = ?1 AND owner_id = ?2",
                params![chain_id, owner],
            )?;
            tx.execute(
                "DELETE FROM chain_links WHERE owner_id = ?1 AND (from_chain_id = ?2 OR to_chain_id = ?2)",
                params![owner, chain_id],
            )?;
            tx.execute(
                "DELETE FROM thought_chains WHERE id = ?1 AND owner_id = ?2",
                params![chain_id, owner],
            )?;
            tx.commit()?;

            Ok(ChainRemoval { chain, thoughts, links })
        })
    }

    // -- Links --

    pub fn list_links(&self, owner_id: Uuid) -> Result<Vec<ChainLink>> {
        self.with_conn(|conn| query_links(conn, "owner_id = ?1", &owner_id.to_string()))
    }

    /// Links are immutable: known ids and duplicate undirected pairs are ignored.
    pub fn insert_links(&self, links: &[ChainLink]) -> Result<Vec<UpsertOutcome>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut outcomes = Vec::with_capacity(links.len());
            for link in links {
                outcomes.push(insert_link(&tx, link)?);
            }
            tx.commit()?;
            Ok(outcomes)
        })
    }

    pub fn delete_link(&self, owner_id: Uuid, id: Uuid) -> Result<Option<ChainLink>> {
        self.with_conn(|conn| {
            let existing = query_links(conn, "id = ?1", &id.to_string())?
                .into_iter()
                .find(|l| l.owner_id == owner_id);
            if existing.is_some() {
                conn.execute(
                    "DELETE FROM chain_links WHERE id = ?1 AND owner_id = ?2",
                    params![id.to_string(), owner_id.to_string()],
                )?;
            }
            Ok(existing)
        })
    }
}

/// Reads `(owner_id, updated_at)` for an id, if the row exists.
fn stored_version(conn: &Connection, table: &str, id: &str) -> Result<Option<(String, String)>> {
    let sql = format!("SELECT owner_id, updated_at FROM {} WHERE id = ?1", table);
    let row = conn
        .query_row(&sql, [id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    Ok(row)
}

fn upsert_thought(conn: &Connection, thought: &Thought) -> Result<UpsertOutcome> {
    let row = ThoughtRow::from_model(thought);

    match stored_version(conn, "thoughts", &row.id)? {
        None => {
            conn.execute(
                &format!("INSERT INTO thoughts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)", THOUGHT_COLUMNS),
                params![
                    row.id,
                    row.owner_id,
                    row.content,
                    row.state,
                    row.created_at,
                    row.updated_at,
                    row.anchored_at,
                    row.display_label,
                    row.chain_id,
                    row.edited_from_id
                ],
            )?;
            Ok(UpsertOutcome::Inserted)
        }
        // Fixed-precision timestamps compare correctly as strings.
        Some((owner, stored)) if owner == row.owner_id && row.updated_at > stored => {
            conn.execute(
                "UPDATE thoughts SET content = ?2, state = ?3, updated_at = ?4, anchored_at = ?5,
                     display_label = ?6, chain_id = ?7, edited_from_id = ?8
                 WHERE id = ?1",
                params![
                    row.id,
                    row.content,
                    row.state,
                    row.updated_at,
                    row.anchored_at,
                    row.display_label,
                    row.chain_id,
                    row.edited_from_id
                ],
            )?;
            Ok(UpsertOutcome::Updated)
        }
        Some(_) => Ok(UpsertOutcome::Ignored),
    }
}

fn upsert_chain(conn: &Connection, chain: &ThoughtChain) -> Result<UpsertOutcome> {
    let row = ChainRow::from_model(chain);

    match stored_version(conn, "thought_chains", &row.id)? {
        None => {
            conn.execute(
                &format!("INSERT INTO thought_chains ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)", CHAIN_COLUMNS),
                params![
                    row.id,
                    row.owner_id,
                    row.created_at,
                    row.updated_at,
                    row.first_thought_at,
                    row.display_label,
                    row.diverged_from_chain_id,
                    row.diverged_at_thought_id
                ],
            )?;
            Ok(UpsertOutcome::Inserted)
        }
        Some((owner, stored)) if owner == row.owner_id && row.updated_at > stored => {
            conn.execute(
                "UPDATE thought_chains SET updated_at = ?2, first_thought_at = ?3, display_label = ?4,
                     diverged_from_chain_id = ?5, diverged_at_thought_id = ?6
                 WHERE id = ?1",
                params![
                    row.id,
                    row.updated_at,
                    row.first_thought_at,
                    row.display_label,
                    row.diverged_from_chain_id,
                    row.diverged_at_thought_id
                ],
            )?;
            Ok(UpsertOutcome::Updated)
        }
        Some(_) => Ok(UpsertOutcome::Ignored),
    }
}

fn insert_link(conn: &Connection, link: &ChainLink) -> Result<UpsertOutcome> {
    if link.from_chain_id == link.to_chain_id {
        return Ok(UpsertOutcome::Ignored);
    }
    let row = LinkRow::from_model(link);
    let (low, high) = normalized_pair(link.from_chain_id, link.to_chain_id);

    let changed = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO chain_links ({}, pair_low, pair_high) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            LINK_COLUMNS
        ),
        params![
            row.id,
            row.owner_id,
            row.from_chain_id,
            row.to_chain_id,
            row.created_at,
            low.to_string(),
            high.to_string()
        ],
    )?;

    Ok(if changed == 0 { UpsertOutcome::Ignored } else { UpsertOutcome::Inserted })
}

fn query_thought(conn: &Connection, owner_id: Uuid, id: Uuid) -> Result<Option<Thought>> {
    Ok(query_thoughts(conn, "id = ?1", &id.to_string())?
        .into_iter()
        .find(|t| t.owner_id == owner_id))
}

fn query_thoughts(conn: &Connection, filter: &str, arg: &str) -> Result<Vec<Thought>> {
    let sql = format!("SELECT {} FROM thoughts WHERE {} ORDER BY created_at", THOUGHT_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([arg], |row| {
            Ok(ThoughtRow {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                content: row.get(2)?,
                state: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
                anchored_at: row.get(6)?,
                display_label: row.get(7)?,
                chain_id: row.get(8)?,
                edited_from_id: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(ThoughtRow::into_model).collect()
}

fn query_chains(conn: &Connection, filter: &str, arg: &str) -> Result<Vec<ThoughtChain>> {
    let sql = format!("SELECT {} FROM thought_chains WHERE {} ORDER BY created_at", CHAIN_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([arg], |row| {
            Ok(ChainRow {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
                first_thought_at: row.get(4)?,
                display_label: row.get(5)?,
                diverged_from_chain_id: row.get(6)?,
                diverged_at_thought_id: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(ChainRow::into_model).collect()
}

fn query_links(conn: &Connection, filter: &str, arg: &str) -> Result<Vec<ChainLink>> {
    let sql = format!("SELECT {} FROM chain_links WHERE {} ORDER BY created_at", LINK_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([arg], |row| {
            Ok(LinkRow {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                from_chain_id: row.get(2)?,
                to_chain_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(LinkRow::into_model).collect()
}

/// Current time in the stored encoding, for cache bookkeeping.
pub(crate) fn now_ts() -> String {
    format_ts(chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use thinkspace_types::ThoughtState;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_thought_upsert_is_last_writer_wins() {
        let db = db();
        let owner = Uuid::new_v4();
        let mut thought = Thought::draft(owner, Utc::now());
        thought.content = "first".into();

        assert_eq!(db.upsert_thoughts(&[thought.clone()]).unwrap(), vec![UpsertOutcome::Inserted]);
        // Same version again is a no-op.
        assert_eq!(db.upsert_thoughts(&[thought.clone()]).unwrap(), vec![UpsertOutcome::Ignored]);

        let mut stale = thought.clone();
        stale.content = "stale".into();
        stale.updated_at = thought.updated_at - Duration::seconds(5);
        assert_eq!(db.upsert_thoughts(&[stale]).unwrap(), vec![UpsertOutcome::Ignored]);

        let mut newer = thought.clone();
        newer.content = "second".into();
        newer.state = ThoughtState::Anchored;
        newer.anchored_at = Some(newer.updated_at + Duration::seconds(1));
        newer.updated_at += Duration::seconds(1);
        assert_eq!(db.upsert_thoughts(&[newer]).unwrap(), vec![UpsertOutcome::Updated]);

        let stored = db.get_thought(owner, thought.id).unwrap().unwrap();
        assert_eq!(stored.content, "second");
        assert_eq!(stored.state, ThoughtState::Anchored);
    }

    #[test]
    fn test_upsert_ignores_foreign_owner() {
        let db = db();
        let thought = Thought::draft(Uuid::new_v4(), Utc::now());
        db.upsert_thoughts(&[thought.clone()]).unwrap();

        let mut hijack = thought.clone();
        hijack.owner_id = Uuid::new_v4();
        hijack.updated_at += Duration::seconds(10);
        assert_eq!(db.upsert_thoughts(&[hijack.clone()]).unwrap(), vec![UpsertOutcome::Ignored]);
        assert!(db.list_thoughts(hijack.owner_id).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_undirected_link_is_ignored() {
        let db = db();
        let owner = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let outcomes = db
            .insert_links(&[
                ChainLink::new(owner, a, b, now),
                ChainLink::new(owner, b, a, now),
                ChainLink::new(owner, a, a, now),
            ])
            .unwrap();
        assert_eq!(
            outcomes,
            vec![UpsertOutcome::Inserted, UpsertOutcome::Ignored, UpsertOutcome::Ignored]
        );
        assert_eq!(db.list_links(owner).unwrap().len(), 1);
    }

    #[test]
    fn test_chain_delete_cascades() {
        let db = db();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let c1 = ThoughtChain::new(owner, now);
        let c2 = ThoughtChain::new(owner, now);
        db.upsert_chains(&[c1.clone(), c2.clone()]).unwrap();

        let mut in_c1 = Thought::draft(owner, now);
        in_c1.chain_id = Some(c1.id);
        let mut in_c2 = Thought::draft(owner, now);
        in_c2.chain_id = Some(c2.id);
        db.upsert_thoughts(&[in_c1.clone(), in_c2.clone()]).unwrap();
        db.insert_links(&[ChainLink::new(owner, c1.id, c2.id, now)]).unwrap();

        let removal = db.delete_chain(owner, c1.id).unwrap();
        assert_eq!(removal.chain.map(|c| c.id), Some(c1.id));
        assert_eq!(removal.thoughts.len(), 1);
        assert_eq!(removal.links.len(), 1);

        let remaining = db.list_thoughts(owner).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, in_c2.id);
        assert!(db.list_links(owner).unwrap().is_empty());

        // Deleting again finds nothing.
        assert!(db.delete_chain(owner, c1.id).unwrap().chain.is_none());
    }

    #[test]
    fn test_on_disk_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thinkspace.db");
        let owner = Uuid::new_v4();
        {
            let db = Database::open(&path).unwrap();
            db.upsert_chains(&[ThoughtChain::new(owner, Utc::now())]).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_chains(owner).unwrap().len(), 1);
    }
}
