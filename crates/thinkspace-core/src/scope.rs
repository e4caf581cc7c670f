use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use thinkspace_types::Thought;
use thinkspace_types::api::SearchResult;

use crate::links::LinkStore;

/// Current feed projection mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "chain_id", rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Global,
    Chain(Uuid),
    Merged(Uuid),
    /// Thoughts returned by the last similarity search.
    Search,
}

/// Scope selection plus the hits backing `Scope::Search`.
#[derive(Debug, Default)]
pub struct ScopeStore {
    scope: Scope,
    hits: Vec<SearchResult>,
}

impl ScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn set(&mut self, scope: Scope) {
        self.scope = scope;
    }

    /// Replace the search hits and switch to the search projection.
    pub fn show_search(&mut self, hits: Vec<SearchResult>) {
        self.hits = hits;
        self.scope = Scope::Search;
    }

    /// Hits in ranked order, with their similarity scores.
    pub fn search_hits(&self) -> &[SearchResult] {
        &self.hits
    }

    /// Focused chain, for the chain-scoped modes.
    pub fn focused_chain(&self) -> Option<Uuid> {
        match self.scope {
            Scope::Chain(id) | Scope::Merged(id) => Some(id),
            Scope::Global | Scope::Search => None,
        }
    }

    /// Filter `thoughts` by the current scope and order them on the timeline.
    pub fn visible<'a>(&self, thoughts: impl IntoIterator<Item = &'a Thought>, links: &LinkStore) -> Vec<&'a Thought> {
        let mut visible: Vec<&Thought> = match self.scope {
            Scope::Global => thoughts.into_iter().collect(),
            Scope::Chain(id) => thoughts.into_iter().filter(|t| t.chain_id == Some(id)).collect(),
            Scope::Merged(id) => {
                let set: BTreeSet<Uuid> = links.merge_set(id);
                thoughts
                    .into_iter()
                    .filter(|t| t.chain_id.is_some_and(|c| set.contains(&c)))
                    .collect()
            }
            Scope::Search => {
                let ids: BTreeSet<Uuid> = self.hits.iter().map(|h| h.id).collect();
                thoughts.into_iter().filter(|t| ids.contains(&t.id)).collect()
            }
        };
        visible.sort_by(|a, b| timeline_order(a, b));
        visible
    }
}

/// Newest first by anchor time (drafts use their creation time), then by
/// `created_at`, then by id so every input permutation sorts the same way.
pub fn timeline_order(a: &Thought, b: &Thought) -> Ordering {
    b.timeline_at()
        .cmp(&a.timeline_at())
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Bucket an already ordered projection by display day, preserving order.
pub fn group_by_day<'a>(ordered: &[&'a Thought]) -> Vec<(NaiveDate, Vec<&'a Thought>)> {
    let mut groups: Vec<(NaiveDate, Vec<&Thought>)> = Vec::new();
    let mut index: HashMap<NaiveDate, usize> = HashMap::new();

    for &thought in ordered {
        let day = thought.day_key();
        match index.get(&day) {
            Some(&i) => groups[i].1.push(thought),
            None => {
                index.insert(day, groups.len());
                groups.push((day, vec![thought]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use thinkspace_types::ThoughtState;

    fn anchored(owner: Uuid, chain: Uuid, minutes: i64) -> Thought {
        let base = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let mut t = Thought::draft(owner, base);
        t.content = format!("t{}", minutes);
        t.state = ThoughtState::Anchored;
        t.anchored_at = Some(base + Duration::minutes(minutes));
        t.chain_id = Some(chain);
        t
    }

    #[test]
    fn test_global_order_ignores_input_permutation() {
        let owner = Uuid::new_v4();
        let chain = Uuid::new_v4();
        let mut thoughts: Vec<Thought> = [5, 1, 3, 3, 9].iter().map(|m| anchored(owner, chain, *m)).collect();
        let store = ScopeStore::new();
        let links = LinkStore::new();

        let expected: Vec<Uuid> = store.visible(&thoughts, &links).iter().map(|t| t.id).collect();
        assert_eq!(expected.len(), thoughts.len());

        thoughts.reverse();
        let reversed: Vec<Uuid> = store.visible(&thoughts, &links).iter().map(|t| t.id).collect();
        assert_eq!(reversed, expected);

        thoughts.rotate_left(2);
        let rotated: Vec<Uuid> = store.visible(&thoughts, &links).iter().map(|t| t.id).collect();
        assert_eq!(rotated, expected);

        let times: Vec<_> = store.visible(&thoughts, &links).iter().map(|t| t.anchored_at).collect();
        assert!(times.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_created_at_breaks_anchor_ties() {
        let owner = Uuid::new_v4();
        let chain = Uuid::new_v4();
        let mut older = anchored(owner, chain, 10);
        let mut newer = anchored(owner, chain, 10);
        newer.created_at = older.created_at + Duration::seconds(1);
        older.content = "older".into();

        let store = ScopeStore::new();
        let list = [older.clone(), newer.clone()];
        let visible = store.visible(&list, &LinkStore::new());
        assert_eq!(visible[0].id, newer.id);
    }

    #[test]
    fn test_merged_scope_interleaves_by_time() {
        let owner = Uuid::new_v4();
        let (c1, c2, c3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut links = LinkStore::new();
        links.create(owner, c1, c2, Utc::now()).unwrap();

        let thoughts = vec![
            anchored(owner, c1, 1),
            anchored(owner, c2, 2),
            anchored(owner, c1, 3),
            anchored(owner, c3, 4),
        ];

        let mut store = ScopeStore::new();
        store.set(Scope::Merged(c1));
        let visible: Vec<&str> = store.visible(&thoughts, &links).iter().map(|t| t.content.as_str()).collect();
        assert_eq!(visible, vec!["t3", "t2", "t1"]);

        store.set(Scope::Chain(c1));
        let visible: Vec<&str> = store.visible(&thoughts, &links).iter().map(|t| t.content.as_str()).collect();
        assert_eq!(visible, vec!["t3", "t1"]);
    }

    #[test]
    fn test_search_scope_shows_hits_on_timeline() {
        let owner = Uuid::new_v4();
        let chain = Uuid::new_v4();
        let thoughts = vec![anchored(owner, chain, 1), anchored(owner, chain, 2), anchored(owner, chain, 3)];

        let hit = |t: &Thought, similarity| SearchResult {
            id: t.id,
            content: t.content.clone(),
            similarity,
            chain_id: t.chain_id,
            anchored_at: t.anchored_at,
            created_at: t.created_at,
        };

        let mut store = ScopeStore::new();
        store.show_search(vec![hit(&thoughts[0], 0.9), hit(&thoughts[2], 0.4)]);
        assert_eq!(store.scope(), Scope::Search);

        let visible: Vec<&str> = store.visible(&thoughts, &LinkStore::new()).iter().map(|t| t.content.as_str()).collect();
        assert_eq!(visible, vec!["t3", "t1"]);
        assert_eq!(store.search_hits()[0].similarity, 0.9);
    }

    #[test]
    fn test_group_by_day_preserves_order() {
        let owner = Uuid::new_v4();
        let chain = Uuid::new_v4();
        let day_two = anchored(owner, chain, 60 * 24);
        let day_one_late = anchored(owner, chain, 30);
        let day_one_early = anchored(owner, chain, 5);
        let ordered = vec![&day_two, &day_one_late, &day_one_early];

        let groups = group_by_day(&ordered);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[1].1[0].id, day_one_late.id);
        assert!(groups[0].0 > groups[1].0);
    }
}
