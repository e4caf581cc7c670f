use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use thinkspace_types::ThoughtChain;

use crate::clock;
use crate::error::SpaceError;
use crate::thoughts::ThoughtStore;

/// Owns the chains of one owner plus the active/pending selection.
///
/// `active` is the chain the UI is composing into. `pending` is a freshly
/// broken chain waiting for its first anchored thought. Selecting an active
/// chain always clears the pending one.
#[derive(Debug, Default)]
pub struct ChainStore {
    chains: HashMap<Uuid, ThoughtChain>,
    active_id: Option<Uuid>,
    pending_id: Option<Uuid>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<&ThoughtChain> {
        self.chains.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.chains.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThoughtChain> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active_id
    }

    pub fn pending_id(&self) -> Option<Uuid> {
        self.pending_id
    }

    /// New empty chain that becomes the active chain.
    pub fn create(&mut self, owner_id: Uuid, now: DateTime<Utc>) -> ThoughtChain {
        let chain = ThoughtChain::new(owner_id, now);
        self.chains.insert(chain.id, chain.clone());
        self.active_id = Some(chain.id);
        self.pending_id = None;
        chain
    }

    /// Fork a new chain off `from` (or the active chain) at `at`. The new
    /// chain becomes pending; the active chain is left alone.
    pub fn break_from(
        &mut self,
        owner_id: Uuid,
        from: Option<Uuid>,
        at: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<ThoughtChain, SpaceError> {
        if let Some(id) = from {
            if !self.chains.contains_key(&id) {
                return Err(SpaceError::UnknownChain(id));
            }
        }
        let source = from.or(self.active_id);

        let mut chain = ThoughtChain::new(owner_id, now);
        chain.diverged_from_chain_id = source;
        chain.diverged_at_thought_id = at;
        self.chains.insert(chain.id, chain.clone());
        self.pending_id = Some(chain.id);
        Ok(chain)
    }

    pub fn set_active(&mut self, id: Option<Uuid>) -> Result<(), SpaceError> {
        if let Some(id) = id {
            if !self.chains.contains_key(&id) {
                return Err(SpaceError::UnknownChain(id));
            }
        }
        self.active_id = id;
        self.pending_id = None;
        Ok(())
    }

    /// Chain that should receive the next anchored thought. A pending chain
    /// is promoted to active here; with no chain at all one is created.
    pub fn take_anchor_target(&mut self, owner_id: Uuid, now: DateTime<Utc>) -> (Uuid, Option<ThoughtChain>) {
        if let Some(pending) = self.pending_id.take() {
            if self.chains.contains_key(&pending) {
                self.active_id = Some(pending);
                return (pending, None);
            }
        }
        if let Some(active) = self.active_id.filter(|id| self.chains.contains_key(id)) {
            return (active, None);
        }
        let chain = self.create(owner_id, now);
        (chain.id, Some(chain))
    }

    pub fn update_label(
        &mut self,
        id: Uuid,
        label: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ThoughtChain, SpaceError> {
        let chain = self.chains.get_mut(&id).ok_or(SpaceError::UnknownChain(id))?;
        chain.display_label = label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        chain.updated_at = clock::advance(chain.updated_at, now);
        Ok(chain.clone())
    }

    /// Removes the chain only. Cascading its thoughts and links is the
    /// caller's job.
    pub fn delete(&mut self, id: Uuid) -> Option<ThoughtChain> {
        if self.active_id == Some(id) {
            self.active_id = None;
        }
        if self.pending_id == Some(id) {
            self.pending_id = None;
        }
        self.chains.remove(&id)
    }

    /// Record that a thought anchored into `id` at `anchored_at`. Returns the
    /// updated chain if `first_thought_at` moved.
    pub fn note_anchor(&mut self, id: Uuid, anchored_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<ThoughtChain> {
        let chain = self.chains.get_mut(&id)?;
        match chain.first_thought_at {
            Some(first) if first <= anchored_at => None,
            _ => {
                chain.first_thought_at = Some(anchored_at);
                chain.updated_at = clock::advance(chain.updated_at, now);
                Some(chain.clone())
            }
        }
    }

    /// Reset `first_thought_at` from the thoughts actually in the chain.
    pub fn refresh_first_thought(&mut self, id: Uuid, thoughts: &ThoughtStore, now: DateTime<Utc>) -> Option<ThoughtChain> {
        let first = thoughts.first_anchor_in(id);
        let chain = self.chains.get_mut(&id)?;
        if chain.first_thought_at == first {
            return None;
        }
        chain.first_thought_at = first;
        chain.updated_at = clock::advance(chain.updated_at, now);
        Some(chain.clone())
    }

    /// Chains with at least one anchored thought, newest first.
    pub fn listed<'a>(&'a self, thoughts: &ThoughtStore) -> Vec<&'a ThoughtChain> {
        let mut listed: Vec<&ThoughtChain> = self
            .chains
            .values()
            .filter(|c| thoughts.has_anchored_in(c.id))
            .collect();
        listed.sort_by(|a, b| {
            b.first_thought_at
                .cmp(&a.first_thought_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        listed
    }

    /// Provenance path from `id` back to its root, starting with `id`.
    pub fn lineage(&self, id: Uuid) -> Vec<Uuid> {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if !seen.insert(current) {
                tracing::warn!("chain lineage cycle at {}", current);
                break;
            }
            path.push(current);
            cursor = self.chains.get(&current).and_then(|c| c.diverged_from_chain_id);
        }
        path
    }

    // -- Reconciliation entry points --

    pub(crate) fn put(&mut self, chain: ThoughtChain) -> bool {
        self.chains.insert(chain.id, chain).is_some()
    }

    pub(crate) fn restore(&mut self, chains: Vec<ThoughtChain>, active_id: Option<Uuid>, pending_id: Option<Uuid>) {
        self.chains = chains.into_iter().map(|c| (c.id, c)).collect();
        self.active_id = active_id.filter(|id| self.chains.contains_key(id));
        self.pending_id = pending_id.filter(|id| self.chains.contains_key(id));
    }
}

/// User label if present, else a title derived from the first anchored thought.
pub fn chain_title(chain: &ThoughtChain) -> String {
    if let Some(label) = &chain.display_label {
        return label.clone();
    }
    match chain.first_thought_at {
        Some(first) => first.format("%b %-d, %Y").to_string(),
        None => "Untitled chain".to_string(),
    }
}
