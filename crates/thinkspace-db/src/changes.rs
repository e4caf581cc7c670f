//! Writes that report what they changed as realtime events.
//!
//! Both the HTTP row service and the embedded one go through here, so an
//! accepted write and its broadcast can never disagree.

use anyhow::Result;
use uuid::Uuid;

use thinkspace_types::api::UpsertSummary;
use thinkspace_types::{ChainLink, ChangeEvent, ChangeKind, Row, Thought, ThoughtChain};

use crate::Database;
use crate::models::UpsertOutcome;

/// Outcome of a published batch: counts plus the events to broadcast.
#[derive(Debug, Default)]
pub struct Published {
    pub summary: UpsertSummary,
    pub events: Vec<ChangeEvent>,
}

impl Published {
    fn record(&mut self, outcome: UpsertOutcome, row: Row) {
        match outcome {
            UpsertOutcome::Inserted => {
                self.summary.inserted += 1;
                self.events.push(ChangeEvent::new(ChangeKind::Insert, row));
            }
            UpsertOutcome::Updated => {
                self.summary.updated += 1;
                self.events.push(ChangeEvent::new(ChangeKind::Update, row));
            }
            UpsertOutcome::Ignored => self.summary.ignored += 1,
        }
    }
}

impl Database {
    pub fn publish_thoughts(&self, thoughts: &[Thought]) -> Result<Published> {
        let outcomes = self.upsert_thoughts(thoughts)?;
        let mut published = Published::default();
        for (outcome, thought) in outcomes.into_iter().zip(thoughts) {
            published.record(outcome, Row::Thoughts(thought.clone()));
        }
        Ok(published)
    }

    pub fn publish_chains(&self, chains: &[ThoughtChain]) -> Result<Published> {
        let outcomes = self.upsert_chains(chains)?;
        let mut published = Published::default();
        for (outcome, chain) in outcomes.into_iter().zip(chains) {
            published.record(outcome, Row::ThoughtChains(chain.clone()));
        }
        Ok(published)
    }

    pub fn publish_links(&self, links: &[ChainLink]) -> Result<Published> {
        let outcomes = self.insert_links(links)?;
        let mut published = Published::default();
        for (outcome, link) in outcomes.into_iter().zip(links) {
            published.record(outcome, Row::ChainLinks(link.clone()));
        }
        Ok(published)
    }

    pub fn retract_thought(&self, owner_id: Uuid, id: Uuid) -> Result<Vec<ChangeEvent>> {
        Ok(self
            .delete_thought(owner_id, id)?
            .map(|t| ChangeEvent::new(ChangeKind::Delete, Row::Thoughts(t)))
            .into_iter()
            .collect())
    }

    /// Cascading chain delete. Emits one delete per removed row, with the
    /// chain itself last.
    pub fn retract_chain(&self, owner_id: Uuid, id: Uuid) -> Result<Vec<ChangeEvent>> {
        let removal = self.delete_chain(owner_id, id)?;
        let mut events: Vec<ChangeEvent> = removal
            .thoughts
            .into_iter()
            .map(|t| ChangeEvent::new(ChangeKind::Delete, Row::Thoughts(t)))
            .collect();
        events.extend(
            removal
                .links
                .into_iter()
                .map(|l| ChangeEvent::new(ChangeKind::Delete, Row::ChainLinks(l))),
        );
        if let Some(chain) = removal.chain {
            events.push(ChangeEvent::new(ChangeKind::Delete, Row::ThoughtChains(chain)));
        }
        Ok(events)
    }

    pub fn retract_link(&self, owner_id: Uuid, id: Uuid) -> Result<Vec<ChangeEvent>> {
        Ok(self
            .delete_link(owner_id, id)?
            .map(|l| ChangeEvent::new(ChangeKind::Delete, Row::ChainLinks(l)))
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_publish_reports_only_accepted_rows() {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let thought = Thought::draft(owner, Utc::now());

        let first = db.publish_thoughts(&[thought.clone()]).unwrap();
        assert_eq!(first.summary.inserted, 1);
        assert_eq!(first.events[0].event_type, ChangeKind::Insert);

        let again = db.publish_thoughts(&[thought.clone()]).unwrap();
        assert_eq!(again.summary.ignored, 1);
        assert!(again.events.is_empty());

        let mut newer = thought.clone();
        newer.content = "edited".into();
        newer.updated_at += Duration::milliseconds(5);
        let updated = db.publish_thoughts(&[newer]).unwrap();
        assert_eq!(updated.events[0].event_type, ChangeKind::Update);
    }

    #[test]
    fn test_retract_chain_emits_cascade() {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let chain = ThoughtChain::new(owner, now);
        let other = ThoughtChain::new(owner, now);
        let mut thought = Thought::draft(owner, now);
        thought.chain_id = Some(chain.id);

        db.publish_chains(&[chain.clone(), other.clone()]).unwrap();
        db.publish_thoughts(&[thought]).unwrap();
        db.publish_links(&[ChainLink::new(owner, chain.id, other.id, now)]).unwrap();

        let events = db.retract_chain(owner, chain.id).unwrap();
        let tables: Vec<_> = events.iter().map(|e| e.table().as_str()).collect();
        assert_eq!(tables, vec!["thoughts", "chain_links", "thought_chains"]);
        assert!(events.iter().all(|e| e.event_type == ChangeKind::Delete));

        assert!(db.retract_chain(owner, chain.id).unwrap().is_empty());
    }
}
