use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use thinkspace_db::Database;

use crate::space::SpaceSnapshot;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Pointers {
    active_thought_id: Option<Uuid>,
    active_chain_id: Option<Uuid>,
    pending_chain_id: Option<Uuid>,
}

/// Offline copy of a space, stored in the local key/value table under
/// `thinkspace:{owner}:{part}`.
#[derive(Clone)]
pub struct SpaceCache {
    db: Arc<Database>,
}

impl SpaceCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(Database::open(path)?)))
    }

    fn key(owner_id: Uuid, part: &str) -> String {
        format!("thinkspace:{}:{}", owner_id, part)
    }

    pub fn save(&self, snapshot: &SpaceSnapshot) -> Result<()> {
        let owner = snapshot.owner_id;
        let pointers = Pointers {
            active_thought_id: snapshot.active_thought_id,
            active_chain_id: snapshot.active_chain_id,
            pending_chain_id: snapshot.pending_chain_id,
        };

        self.db.cache_put(&Self::key(owner, "thoughts"), &serde_json::to_string(&snapshot.thoughts)?)?;
        self.db.cache_put(&Self::key(owner, "chains"), &serde_json::to_string(&snapshot.chains)?)?;
        self.db.cache_put(&Self::key(owner, "links"), &serde_json::to_string(&snapshot.links)?)?;
        self.db.cache_put(&Self::key(owner, "pointers"), &serde_json::to_string(&pointers)?)?;
        self.db
            .cache_put(&Self::key(owner, "reactivated"), &serde_json::to_string(&snapshot.reactivated)?)?;
        debug!("Cached {} thoughts for {}", snapshot.thoughts.len(), owner);
        Ok(())
    }

    /// The cached snapshot, if one was saved. A part that fails to decode is
    /// treated as empty.
    pub fn load(&self, owner_id: Uuid) -> Result<Option<SpaceSnapshot>> {
        let Some(thoughts) = self.db.cache_get(&Self::key(owner_id, "thoughts"))? else {
            return Ok(None);
        };

        let chains = self.db.cache_get(&Self::key(owner_id, "chains"))?;
        let links = self.db.cache_get(&Self::key(owner_id, "links"))?;
        let pointers: Pointers = decode(self.db.cache_get(&Self::key(owner_id, "pointers"))?.as_deref());
        let reactivated = self.db.cache_get(&Self::key(owner_id, "reactivated"))?;

        Ok(Some(SpaceSnapshot {
            owner_id,
            thoughts: decode(Some(thoughts.as_str())),
            chains: decode(chains.as_deref()),
            links: decode(links.as_deref()),
            active_thought_id: pointers.active_thought_id,
            active_chain_id: pointers.active_chain_id,
            pending_chain_id: pointers.pending_chain_id,
            reactivated: decode(reactivated.as_deref()),
        }))
    }

    pub fn clear(&self, owner_id: Uuid) -> Result<usize> {
        self.db.cache_clear_prefix(&format!("thinkspace:{}:", owner_id))
    }
}

fn decode<T: serde::de::DeserializeOwned + Default>(raw: Option<&str>) -> T {
    match raw.map(serde_json::from_str::<T>) {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            warn!("Discarding unreadable cache entry: {}", e);
            T::default()
        }
        None => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use thinkspace_types::Thought;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SpaceCache::open(&dir.path().join("cache.db")).unwrap();
        let owner = Uuid::new_v4();
        assert!(cache.load(owner).unwrap().is_none());

        let draft = Thought::draft(owner, clock::now());
        let snapshot = SpaceSnapshot {
            owner_id: owner,
            thoughts: vec![draft.clone()],
            active_thought_id: Some(draft.id),
            ..SpaceSnapshot::default()
        };
        cache.save(&snapshot).unwrap();

        assert_eq!(cache.load(owner).unwrap(), Some(snapshot));
        assert_eq!(cache.clear(owner).unwrap(), 5);
        assert!(cache.load(owner).unwrap().is_none());
    }

    #[test]
    fn test_reopened_content_is_cached() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = SpaceCache::new(db);
        let owner = Uuid::new_v4();

        let mut reopened = Thought::draft(owner, clock::now());
        reopened.content = "edited".into();
        reopened.anchored_at = Some(reopened.created_at);
        let snapshot = SpaceSnapshot {
            owner_id: owner,
            thoughts: vec![reopened.clone()],
            active_thought_id: Some(reopened.id),
            reactivated: [(reopened.id, "as anchored".to_string())].into_iter().collect(),
            ..SpaceSnapshot::default()
        };
        cache.save(&snapshot).unwrap();

        let loaded = cache.load(owner).unwrap().unwrap();
        assert_eq!(loaded.reactivated.get(&reopened.id).map(String::as_str), Some("as anchored"));
    }

    #[test]
    fn test_corrupt_part_loads_empty() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = SpaceCache::new(db.clone());
        let owner = Uuid::new_v4();
        db.cache_put(&format!("thinkspace:{}:thoughts", owner), "not json").unwrap();

        let snapshot = cache.load(owner).unwrap().unwrap();
        assert!(snapshot.thoughts.is_empty());
        assert_eq!(snapshot.active_thought_id, None);
    }
}
