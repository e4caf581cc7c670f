use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use thinkspace_types::api::SearchResult;
use thinkspace_types::{ChainLink, Thought, ThoughtChain};

use crate::chains::{ChainStore, chain_title};
use crate::clock;
use crate::error::SpaceError;
use crate::links::LinkStore;
use crate::scope::{Scope, ScopeStore};
use crate::thoughts::{CommitOutcome, ThoughtStore};

/// Change notifications for observers of a `Space`.
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceEvent {
    ThoughtUpserted(Thought),
    ThoughtRemoved(Uuid),
    ChainUpserted(ThoughtChain),
    ChainRemoved(Uuid),
    LinkUpserted(ChainLink),
    LinkRemoved(Uuid),
    PointersChanged {
        active_thought: Option<Uuid>,
        active_chain: Option<Uuid>,
        pending_chain: Option<Uuid>,
    },
    ScopeChanged(Scope),
    /// A batch of remote rows (initial load) was merged in.
    Reconciled,
}

/// Serializable state of a space, used by the local cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceSnapshot {
    pub owner_id: Uuid,
    pub thoughts: Vec<Thought>,
    pub chains: Vec<ThoughtChain>,
    pub links: Vec<ChainLink>,
    pub active_thought_id: Option<Uuid>,
    pub active_chain_id: Option<Uuid>,
    pub pending_chain_id: Option<Uuid>,
    /// Content of reopened thoughts as it was when they were reactivated.
    #[serde(default)]
    pub reactivated: BTreeMap<Uuid, String>,
}

/// Everything removed by deleting a chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainRemoval {
    pub chain: Option<ThoughtChain>,
    pub thoughts: Vec<Thought>,
    pub links: Vec<ChainLink>,
}

/// One owner's thinking space. All mutation goes through these methods (or
/// the sync engine's reconciliation step); observers learn about it through
/// `subscribe()`.
pub struct Space {
    owner_id: Uuid,
    pub(crate) thoughts: ThoughtStore,
    pub(crate) chains: ChainStore,
    pub(crate) links: LinkStore,
    pub(crate) scope: ScopeStore,
    events: broadcast::Sender<SpaceEvent>,
}

impl Space {
    pub fn new(owner_id: Uuid) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            owner_id,
            thoughts: ThoughtStore::new(),
            chains: ChainStore::new(),
            links: LinkStore::new(),
            scope: ScopeStore::new(),
            events,
        }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpaceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SpaceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_pointers(&self) {
        self.emit(SpaceEvent::PointersChanged {
            active_thought: self.thoughts.active_id(),
            active_chain: self.chains.active_id(),
            pending_chain: self.chains.pending_id(),
        });
    }

    // -- Read side --

    pub fn thoughts(&self) -> &ThoughtStore {
        &self.thoughts
    }

    pub fn chains(&self) -> &ChainStore {
        &self.chains
    }

    pub fn links(&self) -> &LinkStore {
        &self.links
    }

    pub fn thought(&self, id: Uuid) -> Option<&Thought> {
        self.thoughts.get(id)
    }

    pub fn chain(&self, id: Uuid) -> Option<&ThoughtChain> {
        self.chains.get(id)
    }

    pub fn active_thought(&self) -> Option<&Thought> {
        self.thoughts.active()
    }

    pub fn scope(&self) -> Scope {
        self.scope.scope()
    }

    pub fn search_hits(&self) -> &[SearchResult] {
        self.scope.search_hits()
    }

    pub fn merge_set(&self, chain_id: Uuid) -> BTreeSet<Uuid> {
        self.links.merge_set(chain_id)
    }

    /// The feed under the current scope, in timeline order.
    pub fn visible_thoughts(&self) -> Vec<&Thought> {
        self.scope.visible(self.thoughts.iter(), &self.links)
    }

    /// Non-empty chains with their display titles, newest first.
    pub fn listed_chains(&self) -> Vec<(&ThoughtChain, String)> {
        self.chains
            .listed(&self.thoughts)
            .into_iter()
            .map(|c| (c, chain_title(c)))
            .collect()
    }

    pub fn snapshot(&self) -> SpaceSnapshot {
        let mut thoughts: Vec<Thought> = self.thoughts.iter().cloned().collect();
        thoughts.sort_by_key(|t| t.id);
        let mut chains: Vec<ThoughtChain> = self.chains.iter().cloned().collect();
        chains.sort_by_key(|c| c.id);
        let mut links: Vec<ChainLink> = self.links.iter().cloned().collect();
        links.sort_by_key(|l| l.id);

        SpaceSnapshot {
            owner_id: self.owner_id,
            thoughts,
            chains,
            links,
            active_thought_id: self.thoughts.active_id(),
            active_chain_id: self.chains.active_id(),
            pending_chain_id: self.chains.pending_id(),
            reactivated: self.thoughts.captures(),
        }
    }

    /// Replace all state with a snapshot of the same owner.
    pub fn restore(&mut self, snapshot: SpaceSnapshot) {
        if snapshot.owner_id != self.owner_id {
            tracing::warn!(
                "Ignoring snapshot for owner {} in space of {}",
                snapshot.owner_id,
                self.owner_id
            );
            return;
        }
        let owner_id = self.owner_id;
        let owned = move |owner: Uuid| owner == owner_id;
        self.thoughts.restore(
            snapshot.thoughts.into_iter().filter(|t| owned(t.owner_id)).collect(),
            snapshot.active_thought_id,
            snapshot.reactivated,
        );
        self.chains.restore(
            snapshot.chains.into_iter().filter(|c| owned(c.owner_id)).collect(),
            snapshot.active_chain_id,
            snapshot.pending_chain_id,
        );
        self.links
            .restore(snapshot.links.into_iter().filter(|l| owned(l.owner_id)).collect());
        self.emit(SpaceEvent::Reconciled);
    }

    // -- Thoughts --

    /// Start a new draft. Any previous draft is committed first, which
    /// anchors it if it has content and drops it if it is empty.
    pub fn create_thought(&mut self) -> (Thought, Option<CommitOutcome>) {
        let previous = self
            .thoughts
            .active_id()
            .and_then(|id| self.commit_thought(id).ok());

        let thought = self.thoughts.create(self.owner_id, clock::now());
        self.emit(SpaceEvent::ThoughtUpserted(thought.clone()));
        self.emit_pointers();
        (thought, previous)
    }

    pub fn update_thought(&mut self, id: Uuid, content: &str) -> Result<Thought, SpaceError> {
        let thought = self.thoughts.update(id, content, clock::now())?;
        self.emit(SpaceEvent::ThoughtUpserted(thought.clone()));
        Ok(thought)
    }

    pub fn commit_thought(&mut self, id: Uuid) -> Result<CommitOutcome, SpaceError> {
        let now = clock::now();
        let outcome = self.thoughts.commit(id, now)?;

        let outcome = match outcome {
            CommitOutcome::Discarded(t) => {
                debug!("Discarded empty thought {}", t.id);
                self.emit(SpaceEvent::ThoughtRemoved(t.id));
                CommitOutcome::Discarded(t)
            }
            CommitOutcome::Anchored(t) => CommitOutcome::Anchored(self.settle_anchor(t, now)?),
            CommitOutcome::Superseded { original, edit } => {
                self.emit(SpaceEvent::ThoughtUpserted(original.clone()));
                let edit = self.settle_anchor(edit, now)?;
                CommitOutcome::Superseded { original, edit }
            }
            other @ (CommitOutcome::Unchanged(_) | CommitOutcome::EditedInPlace(_)) => {
                if let Some(t) = other.current() {
                    self.emit(SpaceEvent::ThoughtUpserted(t.clone()));
                }
                other
            }
        };

        self.emit_pointers();
        Ok(outcome)
    }

    /// Put a newly anchored thought into a chain and keep the chain's
    /// `first_thought_at` current.
    fn settle_anchor(&mut self, thought: Thought, now: chrono::DateTime<chrono::Utc>) -> Result<Thought, SpaceError> {
        let thought = match thought.chain_id.filter(|id| self.chains.contains(*id)) {
            Some(_) => thought,
            None => {
                let (chain_id, created) = self.chains.take_anchor_target(self.owner_id, now);
                if let Some(chain) = created {
                    debug!("Auto-created chain {} on first anchor", chain.id);
                    self.emit(SpaceEvent::ChainUpserted(chain));
                }
                self.thoughts.set_chain(thought.id, Some(chain_id), now)?
            }
        };

        if let (Some(chain_id), Some(anchored_at)) = (thought.chain_id, thought.anchored_at) {
            if let Some(chain) = self.chains.note_anchor(chain_id, anchored_at, now) {
                self.emit(SpaceEvent::ChainUpserted(chain));
            }
        }
        self.emit(SpaceEvent::ThoughtUpserted(thought.clone()));
        Ok(thought)
    }

    /// Reopen an anchored thought. Any other draft is committed first, and
    /// what happened to it is returned alongside.
    pub fn reactivate_thought(&mut self, id: Uuid) -> Result<(Thought, Option<CommitOutcome>), SpaceError> {
        let target = self.thoughts.get(id).ok_or(SpaceError::UnknownThought(id))?;
        if !target.is_anchored() {
            return Err(SpaceError::NotAnchored(id));
        }
        let previous = match self.thoughts.active_id() {
            Some(current) => Some(self.commit_thought(current)?),
            None => None,
        };

        let thought = self.thoughts.reactivate(id, clock::now())?;
        self.emit(SpaceEvent::ThoughtUpserted(thought.clone()));
        self.emit_pointers();
        Ok((thought, previous))
    }

    pub fn delete_thought(&mut self, id: Uuid) -> Result<Thought, SpaceError> {
        let was_active = self.thoughts.active_id() == Some(id);
        let thought = self.thoughts.delete(id).ok_or(SpaceError::UnknownThought(id))?;
        self.emit(SpaceEvent::ThoughtRemoved(id));

        if let Some(chain_id) = thought.chain_id {
            if let Some(chain) = self.chains.refresh_first_thought(chain_id, &self.thoughts, clock::now()) {
                self.emit(SpaceEvent::ChainUpserted(chain));
            }
        }
        if was_active {
            self.emit_pointers();
        }
        Ok(thought)
    }

    pub fn label_thought(&mut self, id: Uuid, label: Option<String>) -> Result<Thought, SpaceError> {
        let thought = self.thoughts.set_label(id, label, clock::now())?;
        self.emit(SpaceEvent::ThoughtUpserted(thought.clone()));
        Ok(thought)
    }

    /// Re-chain a thought after the fact.
    pub fn move_thought(&mut self, id: Uuid, chain_id: Uuid) -> Result<Thought, SpaceError> {
        if !self.chains.contains(chain_id) {
            return Err(SpaceError::UnknownChain(chain_id));
        }
        let now = clock::now();
        let previous = self.thoughts.get(id).ok_or(SpaceError::UnknownThought(id))?.chain_id;
        let thought = self.thoughts.set_chain(id, Some(chain_id), now)?;
        self.emit(SpaceEvent::ThoughtUpserted(thought.clone()));

        for affected in previous.into_iter().chain(Some(chain_id)) {
            if let Some(chain) = self.chains.refresh_first_thought(affected, &self.thoughts, now) {
                self.emit(SpaceEvent::ChainUpserted(chain));
            }
        }
        Ok(thought)
    }

    // -- Chains --

    pub fn create_chain(&mut self) -> ThoughtChain {
        let chain = self.chains.create(self.owner_id, clock::now());
        self.emit(SpaceEvent::ChainUpserted(chain.clone()));
        self.emit_pointers();
        chain
    }

    /// Fork a new pending chain from `from` (default: the active chain) at
    /// thought `at`.
    pub fn break_chain(&mut self, from: Option<Uuid>, at: Option<Uuid>) -> Result<ThoughtChain, SpaceError> {
        if let Some(at) = at {
            if !self.thoughts.contains(at) {
                return Err(SpaceError::UnknownThought(at));
            }
        }
        let chain = self.chains.break_from(self.owner_id, from, at, clock::now())?;
        debug!(
            "Chain {} broke from {:?} at {:?}",
            chain.id, chain.diverged_from_chain_id, chain.diverged_at_thought_id
        );
        self.emit(SpaceEvent::ChainUpserted(chain.clone()));
        self.emit_pointers();
        Ok(chain)
    }

    pub fn label_chain(&mut self, id: Uuid, label: Option<String>) -> Result<ThoughtChain, SpaceError> {
        let chain = self.chains.update_label(id, label, clock::now())?;
        self.emit(SpaceEvent::ChainUpserted(chain.clone()));
        Ok(chain)
    }

    pub fn set_active_chain(&mut self, id: Option<Uuid>) -> Result<(), SpaceError> {
        self.chains.set_active(id)?;
        self.emit_pointers();
        Ok(())
    }

    /// Delete a chain, its thoughts, and every link touching it.
    pub fn delete_chain(&mut self, id: Uuid) -> Result<ChainRemoval, SpaceError> {
        let chain = self.chains.delete(id).ok_or(SpaceError::UnknownChain(id))?;
        Ok(self.cascade_chain_removal(chain))
    }

    pub(crate) fn cascade_chain_removal(&mut self, chain: ThoughtChain) -> ChainRemoval {
        let thoughts = self.thoughts.delete_in_chain(chain.id);
        let links = self.links.prune_chain(chain.id);

        for t in &thoughts {
            self.emit(SpaceEvent::ThoughtRemoved(t.id));
        }
        for l in &links {
            self.emit(SpaceEvent::LinkRemoved(l.id));
        }
        self.emit(SpaceEvent::ChainRemoved(chain.id));
        if self.scope.focused_chain() == Some(chain.id) {
            self.set_scope(Scope::Global);
        }
        self.emit_pointers();

        ChainRemoval {
            chain: Some(chain),
            thoughts,
            links,
        }
    }

    // -- Links & scope --

    pub fn create_link(&mut self, a: Uuid, b: Uuid) -> Result<ChainLink, SpaceError> {
        for id in [a, b] {
            if !self.chains.contains(id) {
                return Err(SpaceError::UnknownChain(id));
            }
        }
        let link = self.links.create(self.owner_id, a, b, clock::now())?;
        self.emit(SpaceEvent::LinkUpserted(link.clone()));
        Ok(link)
    }

    pub fn delete_link(&mut self, id: Uuid) -> Result<ChainLink, SpaceError> {
        let link = self.links.delete(id).ok_or(SpaceError::UnknownLink(id))?;
        self.emit(SpaceEvent::LinkRemoved(id));
        Ok(link)
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope.set(scope);
        self.emit(SpaceEvent::ScopeChanged(scope));
    }

    pub fn show_search(&mut self, hits: Vec<SearchResult>) {
        self.scope.show_search(hits);
        self.emit(SpaceEvent::ScopeChanged(Scope::Search));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thinkspace_types::ThoughtState;

    fn anchor(space: &mut Space, content: &str) -> Thought {
        let (draft, _) = space.create_thought();
        space.update_thought(draft.id, content).unwrap();
        space.commit_thought(draft.id).unwrap().current().unwrap().clone()
    }

    #[test]
    fn test_first_anchor_creates_chain() {
        let mut space = Space::new(Uuid::new_v4());
        let t1 = anchor(&mut space, "draft");

        assert_eq!(t1.state, ThoughtState::Anchored);
        let c1 = t1.chain_id.expect("auto chain");
        let chain = space.chain(c1).unwrap();
        assert_eq!(chain.first_thought_at, t1.anchored_at);
        assert_eq!(space.chains().active_id(), Some(c1));
    }

    #[test]
    fn test_break_then_anchor_promotes_pending() {
        let mut space = Space::new(Uuid::new_v4());
        let t1 = anchor(&mut space, "draft");
        let c1 = t1.chain_id.unwrap();

        let c2 = space.break_chain(Some(c1), Some(t1.id)).unwrap();
        assert_eq!(c2.diverged_from_chain_id, Some(c1));
        assert_eq!(c2.diverged_at_thought_id, Some(t1.id));
        assert_eq!(space.chains().pending_id(), Some(c2.id));
        assert_eq!(space.chains().active_id(), Some(c1));

        let t2 = anchor(&mut space, "branch");
        assert_eq!(t2.chain_id, Some(c2.id));
        assert_eq!(space.chains().active_id(), Some(c2.id));
        assert_eq!(space.chains().pending_id(), None);
    }

    #[test]
    fn test_create_commits_previous_draft() {
        let mut space = Space::new(Uuid::new_v4());
        let (first, _) = space.create_thought();
        space.update_thought(first.id, "unfinished").unwrap();

        let (second, previous) = space.create_thought();
        assert!(matches!(previous, Some(CommitOutcome::Anchored(_))));
        assert_eq!(space.active_thought().map(|t| t.id), Some(second.id));

        let active = space.thoughts().iter().filter(|t| t.is_active()).count();
        assert_eq!(active, 1);

        // An empty previous draft is pruned instead.
        let (_, previous) = space.create_thought();
        assert!(matches!(previous, Some(CommitOutcome::Discarded(_))));
        assert!(space.thought(second.id).is_none());
    }

    #[test]
    fn test_empty_chains_are_not_listed() {
        let mut space = Space::new(Uuid::new_v4());
        let t1 = anchor(&mut space, "hello");
        space.create_chain();

        let listed = space.listed_chains();
        assert_eq!(listed.len(), 1);
        assert_eq!(Some(listed[0].0.id), t1.chain_id);
    }

    #[test]
    fn test_delete_chain_cascades_locally() {
        let mut space = Space::new(Uuid::new_v4());
        let t1 = anchor(&mut space, "one");
        let c1 = t1.chain_id.unwrap();
        let c2 = space.create_chain();
        space.create_link(c1, c2.id).unwrap();
        space.set_scope(Scope::Merged(c1));

        let removal = space.delete_chain(c1).unwrap();
        assert_eq!(removal.thoughts.len(), 1);
        assert_eq!(removal.links.len(), 1);
        assert!(space.thought(t1.id).is_none());
        assert!(space.links().is_empty());
        assert_eq!(space.scope(), Scope::Global);
    }

    #[test]
    fn test_link_validation() {
        let mut space = Space::new(Uuid::new_v4());
        let a = space.create_chain();
        let b = space.create_chain();

        space.create_link(a.id, b.id).unwrap();
        assert_eq!(space.create_link(b.id, a.id), Err(SpaceError::DuplicateLink(b.id, a.id)));
        assert_eq!(space.create_link(a.id, a.id), Err(SpaceError::SelfLink));
        let missing = Uuid::new_v4();
        assert_eq!(space.create_link(a.id, missing), Err(SpaceError::UnknownChain(missing)));
        assert_eq!(space.links().len(), 1);
    }

    #[test]
    fn test_merged_view_interleaves_linked_chains() {
        let mut space = Space::new(Uuid::new_v4());
        let a1 = anchor(&mut space, "a1");
        let c1 = a1.chain_id.unwrap();
        let c2 = space.break_chain(Some(c1), Some(a1.id)).unwrap();
        let b1 = anchor(&mut space, "b1");
        space.set_active_chain(Some(c1)).unwrap();
        let a2 = anchor(&mut space, "a2");

        space.create_link(c1, c2.id).unwrap();
        space.set_scope(Scope::Merged(c1));

        let visible: Vec<Uuid> = space.visible_thoughts().iter().map(|t| t.id).collect();
        assert_eq!(visible, vec![a2.id, b1.id, a1.id]);
    }

    #[test]
    fn test_snapshot_restores_pointers() {
        let mut space = Space::new(Uuid::new_v4());
        anchor(&mut space, "kept");
        let (draft, _) = space.create_thought();
        space.update_thought(draft.id, "typing").unwrap();
        let snapshot = space.snapshot();

        let mut restored = Space::new(space.owner_id());
        restored.restore(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.active_thought().map(|t| t.id), Some(draft.id));
    }

    #[test]
    fn test_reopened_thought_survives_restore() {
        let mut space = Space::new(Uuid::new_v4());
        let original = anchor(&mut space, "original");
        space.reactivate_thought(original.id).unwrap();
        space.update_thought(original.id, "totally different").unwrap();

        let mut restored = Space::new(space.owner_id());
        restored.restore(space.snapshot());
        let CommitOutcome::Superseded { original: kept, edit } = restored.commit_thought(original.id).unwrap() else {
            panic!("expected supersede");
        };

        assert_eq!(kept.anchored_at, original.anchored_at);
        assert_eq!(kept.content, "original");
        assert_eq!(edit.content, "totally different");
        assert_eq!(edit.edited_from_id, Some(original.id));
        assert_eq!(restored.thoughts.len(), 2);
    }

    #[test]
    fn test_observers_see_mutations() {
        let mut space = Space::new(Uuid::new_v4());
        let mut rx = space.subscribe();
        let chain = space.create_chain();

        assert_eq!(rx.try_recv().unwrap(), SpaceEvent::ChainUpserted(chain.clone()));
        assert!(matches!(rx.try_recv().unwrap(), SpaceEvent::PointersChanged { active_chain: Some(id), .. } if id == chain.id));
    }
}
