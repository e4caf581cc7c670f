//! In-process row service over a local SQLite database.
//!
//! Used for offline-first single-device setups and by the test suite. It
//! broadcasts the same change events the server's realtime feed would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use tokio::sync::broadcast;
use uuid::Uuid;

use thinkspace_db::{Database, Published};
use thinkspace_types::api::UpsertSummary;
use thinkspace_types::{ChainLink, ChangeEvent, Table};

use crate::remote::{RowService, RowSet};

#[derive(Clone)]
pub struct EmbeddedRowService {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<Database>,
    changes: broadcast::Sender<ChangeEvent>,
    offline: AtomicBool,
    upserts: AtomicUsize,
}

impl EmbeddedRowService {
    pub fn new(db: Arc<Database>) -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                db,
                changes,
                offline: AtomicBool::new(false),
                upserts: AtomicUsize::new(0),
            }),
        }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::open_in_memory()?)))
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Change feed for every owner. Filter on `ChangeEvent::owner_id`.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    /// Simulate losing the connection: every call fails until reset.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::Release);
    }

    /// Number of `upsert_all` calls that reached the store.
    pub fn upsert_calls(&self) -> usize {
        self.inner.upserts.load(Ordering::Acquire)
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::Acquire) {
            bail!("row service unreachable");
        }
        Ok(())
    }

    fn broadcast(&self, events: Vec<ChangeEvent>) {
        for event in events {
            let _ = self.inner.changes.send(event);
        }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.check_online()?;
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

impl RowService for EmbeddedRowService {
    async fn fetch_all(&self, owner_id: Uuid) -> Result<RowSet> {
        self.blocking(move |db| {
            Ok(RowSet {
                thoughts: db.list_thoughts(owner_id)?,
                chains: db.list_chains(owner_id)?,
                links: db.list_links(owner_id)?,
            })
        })
        .await
    }

    async fn upsert_all(&self, owner_id: Uuid, rows: &RowSet) -> Result<UpsertSummary> {
        let mut rows = rows.clone();
        rows.thoughts.retain(|t| t.owner_id == owner_id);
        rows.chains.retain(|c| c.owner_id == owner_id);
        rows.links.retain(|l| l.owner_id == owner_id);

        let batches: Vec<Published> = self
            .blocking(move |db| {
                Ok(vec![
                    db.publish_chains(&rows.chains)?,
                    db.publish_thoughts(&rows.thoughts)?,
                    db.publish_links(&rows.links)?,
                ])
            })
            .await?;
        self.inner.upserts.fetch_add(1, Ordering::AcqRel);

        let mut total = UpsertSummary::default();
        for batch in batches {
            total.inserted += batch.summary.inserted;
            total.updated += batch.summary.updated;
            total.ignored += batch.summary.ignored;
            self.broadcast(batch.events);
        }
        Ok(total)
    }

    async fn insert_link(&self, link: &ChainLink) -> Result<bool> {
        let link = link.clone();
        let published = self.blocking(move |db| db.publish_links(&[link])).await?;
        let inserted = published.summary.inserted > 0;
        self.broadcast(published.events);
        Ok(inserted)
    }

    async fn delete_row(&self, owner_id: Uuid, table: Table, id: Uuid) -> Result<bool> {
        let events = self
            .blocking(move |db| match table {
                Table::Thoughts => db.retract_thought(owner_id, id),
                Table::ThoughtChains => db.retract_chain(owner_id, id),
                Table::ChainLinks => db.retract_link(owner_id, id),
            })
            .await?;
        let deleted = !events.is_empty();
        self.broadcast(events);
        Ok(deleted)
    }
}
