use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use thinkspace_types::ChainLink;

use crate::error::SpaceError;

/// The undirected chain-link graph of one owner.
#[derive(Debug, Default)]
pub struct LinkStore {
    links: HashMap<Uuid, ChainLink>,
}

impl LinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<&ChainLink> {
        self.links.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainLink> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The existing link between `a` and `b`, in either direction.
    pub fn between(&self, a: Uuid, b: Uuid) -> Option<&ChainLink> {
        self.links.values().find(|l| l.other_end(a) == Some(b))
    }

    /// Rejects self links and duplicate undirected pairs before insertion.
    pub fn create(&mut self, owner_id: Uuid, a: Uuid, b: Uuid, now: DateTime<Utc>) -> Result<ChainLink, SpaceError> {
        if a == b {
            return Err(SpaceError::SelfLink);
        }
        if self.between(a, b).is_some() {
            return Err(SpaceError::DuplicateLink(a, b));
        }
        let link = ChainLink::new(owner_id, a, b, now);
        self.links.insert(link.id, link.clone());
        Ok(link)
    }

    pub fn delete(&mut self, id: Uuid) -> Option<ChainLink> {
        self.links.remove(&id)
    }

    /// Chains directly linked to `chain_id`.
    pub fn neighbors(&self, chain_id: Uuid) -> BTreeSet<Uuid> {
        self.links.values().filter_map(|l| l.other_end(chain_id)).collect()
    }

    /// The chain itself plus its direct neighbors. One hop only; links of
    /// neighbors are not followed.
    pub fn merge_set(&self, chain_id: Uuid) -> BTreeSet<Uuid> {
        let mut set = self.neighbors(chain_id);
        set.insert(chain_id);
        set
    }

    /// Drop every link touching `chain_id`.
    pub fn prune_chain(&mut self, chain_id: Uuid) -> Vec<ChainLink> {
        let ids: Vec<Uuid> = self
            .links
            .values()
            .filter(|l| l.touches(chain_id))
            .map(|l| l.id)
            .collect();
        ids.into_iter().filter_map(|id| self.links.remove(&id)).collect()
    }

    /// Drop links whose endpoints are not both in `known`.
    pub fn prune_orphans(&mut self, known: impl Fn(Uuid) -> bool) -> Vec<ChainLink> {
        let ids: Vec<Uuid> = self
            .links
            .values()
            .filter(|l| !known(l.from_chain_id) || !known(l.to_chain_id))
            .map(|l| l.id)
            .collect();
        ids.into_iter().filter_map(|id| self.links.remove(&id)).collect()
    }

    // -- Reconciliation entry points --

    /// Insert a row from the row service. Known ids, self links and
    /// duplicate pairs are no-ops.
    pub(crate) fn put(&mut self, link: ChainLink) -> bool {
        if self.links.contains_key(&link.id)
            || link.from_chain_id == link.to_chain_id
            || self.between(link.from_chain_id, link.to_chain_id).is_some()
        {
            return false;
        }
        self.links.insert(link.id, link);
        true
    }

    pub(crate) fn restore(&mut self, links: Vec<ChainLink>) {
        self.links.clear();
        for link in links {
            self.put(link);
        }
    }
}
