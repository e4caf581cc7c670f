use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use thinkspace_types::{Thought, ThoughtState};

use crate::clock;
use crate::error::SpaceError;

/// What `commit` did with a thought.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Empty draft, removed from the store.
    Discarded(Thought),
    /// Fresh draft became an anchored record.
    Anchored(Thought),
    /// Reactivated thought came back without a meaningful change.
    Unchanged(Thought),
    /// Reactivated thought changed only in whitespace; edited in place.
    EditedInPlace(Thought),
    /// Reactivated thought changed; the original is kept as history and a
    /// new anchored thought points back at it.
    Superseded { original: Thought, edit: Thought },
}

impl CommitOutcome {
    /// The thought that now carries the committed content, if any.
    pub fn current(&self) -> Option<&Thought> {
        match self {
            Self::Discarded(_) => None,
            Self::Anchored(t) | Self::Unchanged(t) | Self::EditedInPlace(t) => Some(t),
            Self::Superseded { edit, .. } => Some(edit),
        }
    }

    /// Whether this commit produced a newly anchored row.
    pub fn is_new_anchor(&self) -> bool {
        matches!(self, Self::Anchored(_) | Self::Superseded { .. })
    }
}

/// Where a remote thought row ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Inserted,
    Replaced,
    /// A remote draft held outside the visible set.
    Deferred,
}

/// Owns every thought of one owner plus the "currently being written" slot.
#[derive(Debug, Default)]
pub struct ThoughtStore {
    thoughts: HashMap<Uuid, Thought>,
    active_id: Option<Uuid>,
    /// Content captured at reactivation time, keyed by thought id.
    reactivated: HashMap<Uuid, String>,
    /// Drafts another session is writing. Never part of the visible set.
    deferred: HashMap<Uuid, Thought>,
}

impl ThoughtStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<&Thought> {
        self.thoughts.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.thoughts.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thought> {
        self.thoughts.values()
    }

    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active_id
    }

    pub fn active(&self) -> Option<&Thought> {
        self.active_id.and_then(|id| self.thoughts.get(&id))
    }

    pub fn deferred(&self) -> impl Iterator<Item = &Thought> {
        self.deferred.values()
    }

    pub fn in_chain(&self, chain_id: Uuid) -> impl Iterator<Item = &Thought> {
        self.thoughts.values().filter(move |t| t.chain_id == Some(chain_id))
    }

    /// Earliest anchor time among the chain's anchored thoughts.
    pub fn first_anchor_in(&self, chain_id: Uuid) -> Option<DateTime<Utc>> {
        self.in_chain(chain_id)
            .filter(|t| t.is_anchored())
            .filter_map(|t| t.anchored_at)
            .min()
    }

    pub fn has_anchored_in(&self, chain_id: Uuid) -> bool {
        self.in_chain(chain_id).any(|t| t.is_anchored())
    }

    /// New empty draft that takes the active slot. The caller commits any
    /// previous active thought first.
    pub fn create(&mut self, owner_id: Uuid, now: DateTime<Utc>) -> Thought {
        let thought = Thought::draft(owner_id, now);
        self.active_id = Some(thought.id);
        self.thoughts.insert(thought.id, thought.clone());
        thought
    }

    pub fn update(&mut self, id: Uuid, content: &str, now: DateTime<Utc>) -> Result<Thought, SpaceError> {
        let thought = self.thoughts.get_mut(&id).ok_or(SpaceError::UnknownThought(id))?;
        if !thought.is_active() {
            return Err(SpaceError::NotActive(id));
        }
        if thought.content != content {
            thought.content = content.to_string();
            thought.updated_at = clock::advance(thought.updated_at, now);
        }
        Ok(thought.clone())
    }

    pub fn commit(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<CommitOutcome, SpaceError> {
        let thought = self.thoughts.remove(&id).ok_or(SpaceError::UnknownThought(id))?;
        if !thought.is_active() {
            self.thoughts.insert(id, thought);
            return Err(SpaceError::NotActive(id));
        }

        if self.active_id == Some(id) {
            self.active_id = None;
        }

        Ok(match self.reactivated.remove(&id) {
            Some(original) => self.recommit(thought, original, now),
            // Reopened elsewhere with no local capture; anchored_at is never re-stamped.
            None if thought.anchored_at.is_some() => {
                let original = thought.content.clone();
                self.recommit(thought, original, now)
            }
            None => self.first_commit(thought, now),
        })
    }

    fn first_commit(&mut self, mut thought: Thought, now: DateTime<Utc>) -> CommitOutcome {
        if thought.is_blank() {
            return CommitOutcome::Discarded(thought);
        }

        thought.state = ThoughtState::Anchored;
        thought.updated_at = clock::advance(thought.updated_at, now);
        thought.anchored_at = Some(thought.updated_at);
        self.thoughts.insert(thought.id, thought.clone());
        CommitOutcome::Anchored(thought)
    }

    /// Three-way decision for a reactivate -> commit round trip.
    fn recommit(&mut self, mut thought: Thought, original: String, now: DateTime<Utc>) -> CommitOutcome {
        let edited = std::mem::replace(&mut thought.content, original);
        thought.state = ThoughtState::Anchored;
        thought.updated_at = clock::advance(thought.updated_at, now);

        let trimmed = edited.trim();
        if trimmed.is_empty() || trimmed == thought.content.trim() {
            let in_place = !trimmed.is_empty() && edited != thought.content;
            if in_place {
                thought.content = edited;
            }
            self.thoughts.insert(thought.id, thought.clone());
            return if in_place {
                CommitOutcome::EditedInPlace(thought)
            } else {
                CommitOutcome::Unchanged(thought)
            };
        }

        let mut edit = Thought::draft(thought.owner_id, thought.updated_at);
        edit.content = edited;
        edit.state = ThoughtState::Anchored;
        edit.anchored_at = Some(edit.created_at);
        edit.chain_id = thought.chain_id;
        edit.edited_from_id = Some(thought.id);

        self.thoughts.insert(thought.id, thought.clone());
        self.thoughts.insert(edit.id, edit.clone());
        CommitOutcome::Superseded { original: thought, edit }
    }

    /// Reopen an anchored thought for editing. The caller commits any other
    /// active thought first.
    pub fn reactivate(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<Thought, SpaceError> {
        let thought = self.thoughts.get_mut(&id).ok_or(SpaceError::UnknownThought(id))?;
        if !thought.is_anchored() {
            return Err(SpaceError::NotAnchored(id));
        }
        self.reactivated.insert(id, thought.content.clone());
        thought.state = ThoughtState::Active;
        thought.updated_at = clock::advance(thought.updated_at, now);
        self.active_id = Some(id);
        Ok(thought.clone())
    }

    pub fn delete(&mut self, id: Uuid) -> Option<Thought> {
        if self.active_id == Some(id) {
            self.active_id = None;
        }
        self.reactivated.remove(&id);
        self.deferred.remove(&id);
        self.thoughts.remove(&id)
    }

    pub fn delete_in_chain(&mut self, chain_id: Uuid) -> Vec<Thought> {
        let ids: Vec<Uuid> = self.in_chain(chain_id).map(|t| t.id).collect();
        ids.into_iter().filter_map(|id| self.delete(id)).collect()
    }

    /// Cosmetic label; allowed in any state.
    pub fn set_label(&mut self, id: Uuid, label: Option<String>, now: DateTime<Utc>) -> Result<Thought, SpaceError> {
        let thought = self.thoughts.get_mut(&id).ok_or(SpaceError::UnknownThought(id))?;
        thought.display_label = label.filter(|l| !l.trim().is_empty());
        thought.updated_at = clock::advance(thought.updated_at, now);
        Ok(thought.clone())
    }

    /// Re-chain a thought; allowed in any state.
    pub fn set_chain(&mut self, id: Uuid, chain_id: Option<Uuid>, now: DateTime<Utc>) -> Result<Thought, SpaceError> {
        let thought = self.thoughts.get_mut(&id).ok_or(SpaceError::UnknownThought(id))?;
        if thought.chain_id != chain_id {
            thought.chain_id = chain_id;
            thought.updated_at = clock::advance(thought.updated_at, now);
        }
        Ok(thought.clone())
    }

    // -- Reconciliation entry points --

    /// Place a row that came from the row service. `merged` is the row after
    /// the authority rule was applied against any local copy.
    pub(crate) fn place_remote(&mut self, merged: Thought, existed: bool) -> Placement {
        let id = merged.id;

        if merged.is_active() && self.active_id != Some(id) {
            if self.active_id.is_none() && !existed {
                self.deferred.remove(&id);
                if merged.anchored_at.is_some() {
                    self.reactivated.insert(id, merged.content.clone());
                }
                self.active_id = Some(id);
                self.thoughts.insert(id, merged);
                return Placement::Inserted;
            }
            // Another session's draft, or a row reopened elsewhere while our
            // slot is taken. Hold it until it comes back anchored.
            self.deferred.insert(id, merged);
            return Placement::Deferred;
        }

        self.deferred.remove(&id);
        self.thoughts.insert(id, merged);
        if existed { Placement::Replaced } else { Placement::Inserted }
    }

    pub(crate) fn deferred_get(&self, id: Uuid) -> Option<&Thought> {
        self.deferred.get(&id)
    }

    /// Content captured at reactivation for every thought still open.
    pub fn captures(&self) -> BTreeMap<Uuid, String> {
        self.reactivated.iter().map(|(id, content)| (*id, content.clone())).collect()
    }

    /// Restore from a persisted snapshot. Extra active rows are deferred.
    /// Captures are kept only for the thought that gets the active slot.
    pub(crate) fn restore(
        &mut self,
        thoughts: Vec<Thought>,
        active_id: Option<Uuid>,
        mut captures: BTreeMap<Uuid, String>,
    ) {
        self.thoughts.clear();
        self.deferred.clear();
        self.reactivated.clear();
        self.active_id = None;

        let active_id = active_id.filter(|id| thoughts.iter().any(|t| t.id == *id && t.is_active()));
        for thought in thoughts {
            if thought.is_active() && Some(thought.id) != active_id {
                self.deferred.insert(thought.id, thought);
            } else {
                self.thoughts.insert(thought.id, thought);
            }
        }
        if let Some(id) = active_id {
            if let Some(original) = captures.remove(&id) {
                self.reactivated.insert(id, original);
            }
        }
        self.active_id = active_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_draft(content: &str) -> (ThoughtStore, Uuid) {
        let mut store = ThoughtStore::new();
        let now = clock::now();
        let t = store.create(Uuid::new_v4(), now);
        store.update(t.id, content, now).unwrap();
        (store, t.id)
    }

    #[test]
    fn test_commit_empty_draft_discards() {
        let (mut store, id) = store_with_draft("   ");
        let outcome = store.commit(id, clock::now()).unwrap();
        assert!(matches!(outcome, CommitOutcome::Discarded(_)));
        assert!(store.get(id).is_none());
        assert!(store.active_id().is_none());
    }

    #[test]
    fn test_commit_anchors_and_freezes_content() {
        let (mut store, id) = store_with_draft("draft");
        let outcome = store.commit(id, clock::now()).unwrap();

        let anchored = outcome.current().unwrap().clone();
        assert_eq!(anchored.state, ThoughtState::Anchored);
        assert!(anchored.anchored_at.is_some());
        assert!(store.active_id().is_none());

        assert_eq!(store.update(id, "changed", clock::now()), Err(SpaceError::NotActive(id)));
        assert_eq!(store.get(id).unwrap().content, "draft");
    }

    #[test]
    fn test_reactivate_unchanged_is_noop() {
        let (mut store, id) = store_with_draft("idea");
        let anchored_at = store.commit(id, clock::now()).unwrap().current().unwrap().anchored_at;

        store.reactivate(id, clock::now()).unwrap();
        assert_eq!(store.active_id(), Some(id));
        let outcome = store.commit(id, clock::now()).unwrap();

        assert!(matches!(outcome, CommitOutcome::Unchanged(_)));
        let t = store.get(id).unwrap();
        assert_eq!(t.anchored_at, anchored_at);
        assert_eq!(t.state, ThoughtState::Anchored);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reactivate_whitespace_edit_is_in_place() {
        let (mut store, id) = store_with_draft("idea");
        store.commit(id, clock::now()).unwrap();
        store.reactivate(id, clock::now()).unwrap();
        store.update(id, "idea  \n", clock::now()).unwrap();

        let outcome = store.commit(id, clock::now()).unwrap();
        assert!(matches!(outcome, CommitOutcome::EditedInPlace(_)));
        assert_eq!(store.get(id).unwrap().content, "idea  \n");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reactivate_real_edit_supersedes() {
        let (mut store, id) = store_with_draft("first take");
        store.commit(id, clock::now()).unwrap();
        store.reactivate(id, clock::now()).unwrap();
        store.update(id, "second take", clock::now()).unwrap();

        let CommitOutcome::Superseded { original, edit } = store.commit(id, clock::now()).unwrap() else {
            panic!("expected supersede");
        };
        assert_eq!(original.content, "first take");
        assert_eq!(store.get(id).unwrap().content, "first take");
        assert_eq!(edit.content, "second take");
        assert_eq!(edit.edited_from_id, Some(id));
        assert_eq!(edit.state, ThoughtState::Anchored);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_blanking_a_reactivated_thought_keeps_history() {
        let (mut store, id) = store_with_draft("keep me");
        store.commit(id, clock::now()).unwrap();
        store.reactivate(id, clock::now()).unwrap();
        store.update(id, "", clock::now()).unwrap();

        let outcome = store.commit(id, clock::now()).unwrap();
        assert!(matches!(outcome, CommitOutcome::Unchanged(_)));
        assert_eq!(store.get(id).unwrap().content, "keep me");
    }

    #[test]
    fn test_reactivate_requires_anchored() {
        let (mut store, id) = store_with_draft("x");
        assert_eq!(store.reactivate(id, clock::now()), Err(SpaceError::NotAnchored(id)));
    }

    #[test]
    fn test_delete_clears_active_slot() {
        let (mut store, id) = store_with_draft("x");
        assert!(store.delete(id).is_some());
        assert!(store.active_id().is_none());
        assert!(store.delete(id).is_none());
    }

    #[test]
    fn test_remote_draft_is_deferred_while_slot_taken() {
        let (mut store, local) = store_with_draft("mine");
        let remote = Thought::draft(store.get(local).unwrap().owner_id, clock::now());

        assert_eq!(store.place_remote(remote.clone(), false), Placement::Deferred);
        assert_eq!(store.active_id(), Some(local));
        assert!(store.get(remote.id).is_none());
        assert!(store.deferred_get(remote.id).is_some());
    }

    #[test]
    fn test_restored_reactivation_still_supersedes() {
        let (mut store, id) = store_with_draft("first take");
        store.commit(id, clock::now()).unwrap();
        let anchored_at = store.get(id).unwrap().anchored_at;
        store.reactivate(id, clock::now()).unwrap();
        store.update(id, "second take", clock::now()).unwrap();

        let rows: Vec<Thought> = store.iter().cloned().collect();
        let mut reopened = ThoughtStore::new();
        reopened.restore(rows, store.active_id(), store.captures());

        let CommitOutcome::Superseded { original, edit } = reopened.commit(id, clock::now()).unwrap() else {
            panic!("expected supersede");
        };
        assert_eq!(original.content, "first take");
        assert_eq!(original.anchored_at, anchored_at);
        assert_eq!(edit.edited_from_id, Some(id));
        assert!(reopened.captures().is_empty());
    }

    #[test]
    fn test_commit_without_capture_keeps_anchor_time() {
        let (mut store, id) = store_with_draft("written elsewhere");
        store.commit(id, clock::now()).unwrap();
        store.reactivate(id, clock::now()).unwrap();
        let reopened_row = store.get(id).unwrap().clone();

        let mut other = ThoughtStore::new();
        other.restore(vec![reopened_row.clone()], Some(id), BTreeMap::new());
        other.update(id, "changed here", clock::now()).unwrap();

        let outcome = other.commit(id, clock::now()).unwrap();
        assert!(matches!(outcome, CommitOutcome::Unchanged(_)));
        let committed = other.get(id).unwrap();
        assert_eq!(committed.anchored_at, reopened_row.anchored_at);
        assert_eq!(committed.content, "changed here");
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_adopted_reopened_row_captures_content() {
        let mut store = ThoughtStore::new();
        let now = clock::now();
        let mut remote = Thought::draft(Uuid::new_v4(), now);
        remote.content = "from the phone".into();
        remote.anchored_at = Some(now);

        assert_eq!(store.place_remote(remote.clone(), false), Placement::Inserted);
        assert_eq!(store.active_id(), Some(remote.id));
        store.update(remote.id, "edited on the laptop", clock::now()).unwrap();

        let CommitOutcome::Superseded { original, edit } = store.commit(remote.id, clock::now()).unwrap() else {
            panic!("expected supersede");
        };
        assert_eq!(original.content, "from the phone");
        assert_eq!(original.anchored_at, Some(now));
        assert_eq!(edit.content, "edited on the laptop");
    }
}
