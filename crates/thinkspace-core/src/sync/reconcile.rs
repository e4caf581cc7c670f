//! The authority rule and its application to a `Space`.
//!
//! A remote row replaces the local copy only when its `updated_at` is
//! strictly newer. The one exception: a thought that is `active` locally
//! stays `active`, taking every other field from the remote row.

use tracing::{debug, trace};
use uuid::Uuid;

use thinkspace_types::{ChainLink, ChangeEvent, ChangeKind, Row, Thought, ThoughtChain, ThoughtState};

use crate::remote::RowSet;
use crate::space::{Space, SpaceEvent};
use crate::thoughts::Placement;

/// Merge a remote thought into a local one. `None` means the local row stands.
pub fn resolve_thought(local: &Thought, remote: &Thought) -> Option<Thought> {
    if remote.updated_at <= local.updated_at {
        return None;
    }
    let mut merged = remote.clone();
    if local.is_active() {
        merged.state = ThoughtState::Active;
    }
    Some(merged)
}

pub fn resolve_chain(local: &ThoughtChain, remote: &ThoughtChain) -> Option<ThoughtChain> {
    (remote.updated_at > local.updated_at).then(|| remote.clone())
}

/// What a single inbound event did to the space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// Echo of a row we already hold, or an older version.
    Unchanged,
    /// Remote draft parked outside the visible set.
    Deferred,
    Removed,
    /// Row for a different owner.
    Foreign,
}

/// Apply one realtime event. Events are independent and idempotent.
pub fn apply_event(space: &mut Space, event: ChangeEvent) -> Applied {
    if event.owner_id() != space.owner_id() {
        return Applied::Foreign;
    }

    match (event.event_type, event.row) {
        (ChangeKind::Delete, row) => remove_row(space, row),

        (ChangeKind::Insert, Row::Thoughts(t)) if known_thought(space, t.id) => Applied::Unchanged,
        (ChangeKind::Insert, Row::ThoughtChains(c)) if space.chains.contains(c.id) => Applied::Unchanged,
        (ChangeKind::Insert, Row::ChainLinks(l)) if space.links.get(l.id).is_some() => Applied::Unchanged,

        // Inserts of new ids and updates (known or not) share one path.
        (_, Row::Thoughts(t)) => absorb_thought(space, t),
        (_, Row::ThoughtChains(c)) => absorb_chain(space, c),
        (_, Row::ChainLinks(l)) => absorb_link(space, l),
    }
}

fn known_thought(space: &Space, id: Uuid) -> bool {
    space.thoughts.contains(id) || space.thoughts.deferred_get(id).is_some()
}

/// Place a remote thought under the authority rule.
pub fn absorb_thought(space: &mut Space, remote: Thought) -> Applied {
    let (merged, existed) = if let Some(local) = space.thoughts.get(remote.id) {
        match resolve_thought(local, &remote) {
            Some(merged) => (merged, true),
            None => {
                trace!("Kept local thought {} (not older than remote)", remote.id);
                return Applied::Unchanged;
            }
        }
    } else if let Some(parked) = space.thoughts.deferred_get(remote.id) {
        // A parked draft belongs to another session; no active-state exception.
        if remote.updated_at <= parked.updated_at {
            return Applied::Unchanged;
        }
        (remote, true)
    } else {
        (remote, false)
    };

    let id = merged.id;
    let was_active = space.thoughts.active_id();
    match space.thoughts.place_remote(merged, existed) {
        Placement::Deferred => {
            debug!("Deferred remote draft {}", id);
            Applied::Deferred
        }
        Placement::Inserted | Placement::Replaced => {
            if let Some(thought) = space.thoughts.get(id).cloned() {
                space.emit(SpaceEvent::ThoughtUpserted(thought));
            }
            if space.thoughts.active_id() != was_active {
                space.emit_pointers();
            }
            Applied::Changed
        }
    }
}

pub fn absorb_chain(space: &mut Space, remote: ThoughtChain) -> Applied {
    let merged = match space.chains.get(remote.id) {
        Some(local) => match resolve_chain(local, &remote) {
            Some(merged) => merged,
            None => return Applied::Unchanged,
        },
        None => remote,
    };
    space.chains.put(merged.clone());
    space.emit(SpaceEvent::ChainUpserted(merged));
    Applied::Changed
}

/// Links are immutable; only unknown ids and unseen pairs land.
pub fn absorb_link(space: &mut Space, remote: ChainLink) -> Applied {
    if space.links.put(remote.clone()) {
        space.emit(SpaceEvent::LinkUpserted(remote));
        Applied::Changed
    } else {
        Applied::Unchanged
    }
}

/// Deletes always win: no timestamp comparison.
fn remove_row(space: &mut Space, row: Row) -> Applied {
    match row {
        Row::Thoughts(t) => {
            let was_active = space.thoughts.active_id() == Some(t.id);
            if space.thoughts.delete(t.id).is_none() {
                return Applied::Unchanged;
            }
            space.emit(SpaceEvent::ThoughtRemoved(t.id));
            if was_active {
                space.emit_pointers();
            }
            Applied::Removed
        }
        Row::ThoughtChains(c) => match space.chains.delete(c.id) {
            Some(chain) => {
                space.cascade_chain_removal(chain);
                Applied::Removed
            }
            None => Applied::Unchanged,
        },
        Row::ChainLinks(l) => {
            if space.links.delete(l.id).is_none() {
                return Applied::Unchanged;
            }
            space.emit(SpaceEvent::LinkRemoved(l.id));
            Applied::Removed
        }
    }
}

/// Counts from merging a full fetch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadMerge {
    pub changed: usize,
    pub deferred: usize,
    pub pruned_links: usize,
}

/// Merge an initial load into whatever the space already holds. Rows that
/// only exist locally are kept; they reach the server on the next sync.
pub fn merge_load(space: &mut Space, rows: RowSet) -> LoadMerge {
    let owner = space.owner_id();
    let mut merge = LoadMerge::default();

    for chain in rows.chains.into_iter().filter(|c| c.owner_id == owner) {
        if absorb_chain(space, chain) == Applied::Changed {
            merge.changed += 1;
        }
    }
    for thought in rows.thoughts.into_iter().filter(|t| t.owner_id == owner) {
        match absorb_thought(space, thought) {
            Applied::Changed => merge.changed += 1,
            Applied::Deferred => merge.deferred += 1,
            _ => {}
        }
    }
    for link in rows.links.into_iter().filter(|l| l.owner_id == owner) {
        if absorb_link(space, link) == Applied::Changed {
            merge.changed += 1;
        }
    }

    let chains = &space.chains;
    let pruned = space.links.prune_orphans(|id| chains.contains(id));
    for link in &pruned {
        space.emit(SpaceEvent::LinkRemoved(link.id));
    }
    merge.pruned_links = pruned.len();

    space.emit(SpaceEvent::Reconciled);
    merge
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::clock;

    fn anchored(owner: Uuid, content: &str) -> Thought {
        let mut t = Thought::draft(owner, clock::now());
        t.content = content.into();
        t.state = ThoughtState::Anchored;
        t.anchored_at = Some(t.created_at);
        t
    }

    #[test]
    fn test_newer_remote_wins_field_for_field() {
        let owner = Uuid::new_v4();
        let local = anchored(owner, "local");
        let mut remote = local.clone();
        remote.display_label = Some("renamed".into());
        remote.updated_at = local.updated_at + Duration::seconds(1);

        assert_eq!(resolve_thought(&local, &remote), Some(remote.clone()));

        remote.updated_at = local.updated_at;
        assert_eq!(resolve_thought(&local, &remote), None);
    }

    #[test]
    fn test_local_active_state_survives_newer_remote() {
        let owner = Uuid::new_v4();
        let mut local = anchored(owner, "typing");
        local.state = ThoughtState::Active;
        let mut remote = anchored(owner, "typing");
        remote.id = local.id;
        remote.content = "remote words".into();
        remote.updated_at = local.updated_at + Duration::seconds(1);

        let merged = resolve_thought(&local, &remote).unwrap();
        assert_eq!(merged.state, ThoughtState::Active);
        assert_eq!(merged.content, "remote words");
        assert_eq!(merged.updated_at, remote.updated_at);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let owner = Uuid::new_v4();
        let mut space = Space::new(owner);
        let event = ChangeEvent::new(ChangeKind::Insert, Row::Thoughts(anchored(owner, "from elsewhere")));

        assert_eq!(apply_event(&mut space, event.clone()), Applied::Changed);
        let once = space.snapshot();
        assert_eq!(apply_event(&mut space, event), Applied::Unchanged);
        assert_eq!(space.snapshot(), once);
    }

    #[test]
    fn test_update_for_unknown_id_inserts() {
        let owner = Uuid::new_v4();
        let mut space = Space::new(owner);
        let thought = anchored(owner, "late");
        let applied = apply_event(&mut space, ChangeEvent::new(ChangeKind::Update, Row::Thoughts(thought.clone())));

        assert_eq!(applied, Applied::Changed);
        assert_eq!(space.thought(thought.id), Some(&thought));
    }

    #[test]
    fn test_delete_wins_without_timestamp_check() {
        let owner = Uuid::new_v4();
        let mut space = Space::new(owner);
        let (draft, _) = space.create_thought();
        space.update_thought(draft.id, "mine").unwrap();

        let mut stale = space.thought(draft.id).unwrap().clone();
        stale.updated_at -= Duration::days(1);
        let applied = apply_event(&mut space, ChangeEvent::new(ChangeKind::Delete, Row::Thoughts(stale)));

        assert_eq!(applied, Applied::Removed);
        assert!(space.thought(draft.id).is_none());
        assert_eq!(space.thoughts().active_id(), None);
    }

    #[test]
    fn test_foreign_rows_are_dropped() {
        let mut space = Space::new(Uuid::new_v4());
        let event = ChangeEvent::new(ChangeKind::Insert, Row::Thoughts(anchored(Uuid::new_v4(), "not mine")));
        assert_eq!(apply_event(&mut space, event), Applied::Foreign);
        assert!(space.thoughts().is_empty());
    }

    #[test]
    fn test_remote_draft_waits_until_anchored() {
        let owner = Uuid::new_v4();
        let mut space = Space::new(owner);
        let (mine, _) = space.create_thought();

        let mut theirs = Thought::draft(owner, clock::now());
        theirs.content = "other tab".into();
        let applied = apply_event(&mut space, ChangeEvent::new(ChangeKind::Insert, Row::Thoughts(theirs.clone())));
        assert_eq!(applied, Applied::Deferred);
        assert!(space.visible_thoughts().iter().all(|t| t.id != theirs.id));
        assert_eq!(space.thoughts().active_id(), Some(mine.id));

        theirs.state = ThoughtState::Anchored;
        theirs.anchored_at = Some(theirs.updated_at);
        theirs.updated_at += Duration::seconds(1);
        let applied = apply_event(&mut space, ChangeEvent::new(ChangeKind::Update, Row::Thoughts(theirs.clone())));
        assert_eq!(applied, Applied::Changed);
        assert!(space.visible_thoughts().iter().any(|t| t.id == theirs.id));
        assert_eq!(space.thoughts().active_id(), Some(mine.id));
    }

    #[test]
    fn test_remote_chain_delete_cascades() {
        let owner = Uuid::new_v4();
        let mut space = Space::new(owner);
        let (draft, _) = space.create_thought();
        space.update_thought(draft.id, "in c1").unwrap();
        space.commit_thought(draft.id).unwrap();
        let c1 = space.thought(draft.id).unwrap().chain_id.unwrap();
        let c2 = space.create_chain();
        space.create_link(c1, c2.id).unwrap();

        let chain = space.chain(c1).unwrap().clone();
        let applied = apply_event(&mut space, ChangeEvent::new(ChangeKind::Delete, Row::ThoughtChains(chain)));

        assert_eq!(applied, Applied::Removed);
        assert!(space.thought(draft.id).is_none());
        assert!(space.links().is_empty());
    }

    #[test]
    fn test_load_merge_prunes_orphan_links() {
        let owner = Uuid::new_v4();
        let mut space = Space::new(owner);
        let now = clock::now();
        let a = ThoughtChain::new(owner, now);
        let b = ThoughtChain::new(owner, now);

        let rows = RowSet {
            thoughts: vec![anchored(owner, "loaded")],
            chains: vec![a.clone()],
            links: vec![ChainLink::new(owner, a.id, b.id, now)],
        };
        let merge = merge_load(&mut space, rows);

        assert_eq!(merge.pruned_links, 1);
        assert!(space.links().is_empty());
        assert_eq!(space.thoughts().len(), 1);
        assert!(space.chain(a.id).is_some());
    }
}
