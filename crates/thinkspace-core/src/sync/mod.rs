//! The sync engine: one task that owns the `Space` and serializes every
//! mutation, whether it comes from the local handle, the realtime feed, or a
//! finished network call.
//!
//! Network I/O (initial load, outbound upserts, remote deletes) runs in
//! spawned tasks whose results rejoin the loop as `Completion`s.

mod handle;
pub mod load;
pub mod outbound;
pub mod reconcile;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use thinkspace_types::api::UpsertSummary;
use thinkspace_types::{ChangeEvent, ChangeKind, Table};

use crate::cache::SpaceCache;
use crate::config::SyncConfig;
use crate::remote::{RowService, RowSet};
use crate::space::Space;

use load::LoadTracker;
use outbound::{Fire, Outbound};

pub use handle::{Confirmed, SpaceHandle};

/// Connectivity and progress, published through a `watch` channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub loading: bool,
    pub connected: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Ids deleted here that still shadow incoming rows.
    pub pending_deletes: usize,
}

/// Messages from the realtime channel.
#[derive(Debug, Clone)]
pub enum Inbound {
    Event(ChangeEvent),
    Connectivity(bool),
}

/// What a local mutation asks of the engine besides the state change.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    changed: bool,
    force: bool,
    remote_deletes: Vec<(Table, Uuid)>,
    tombstones: Vec<Uuid>,
}

impl Effects {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn changed() -> Self {
        Self {
            changed: true,
            ..Self::default()
        }
    }

    /// Push without waiting for the quiet period.
    pub(crate) fn forced(mut self) -> Self {
        self.changed = true;
        self.force = true;
        self
    }

    /// Delete `id` remotely and shadow it until the delete settles.
    pub(crate) fn delete_remote(mut self, table: Table, id: Uuid) -> Self {
        self.remote_deletes.push((table, id));
        self.tombstones.push(id);
        self
    }

    /// Remember `id` as deleted here without issuing a delete for it.
    pub(crate) fn tombstone(mut self, id: Uuid) -> Self {
        self.tombstones.push(id);
        self
    }
}

pub(crate) enum Command {
    Mutate(Box<dyn FnOnce(&mut Space) -> Effects + Send>),
    Read(Box<dyn FnOnce(&Space) + Send>),
    Load,
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

enum Completion {
    Loaded { generation: u64, result: Result<RowSet> },
    Pushed { hash: String, result: Result<UpsertSummary> },
    Deleted { table: Table, id: Uuid, result: Result<bool> },
}

pub struct SyncEngine<R: RowService> {
    space: Space,
    remote: Arc<R>,
    config: SyncConfig,
    cache: Option<SpaceCache>,
    outbound: Outbound,
    loads: LoadTracker,
    /// Ids deleted here whose remote delete has not been echoed back yet.
    tombstones: HashSet<Uuid>,
    /// Deletes that found nothing while a push was in flight; retried once it lands.
    recheck: Vec<(Table, Uuid)>,
    status: watch::Sender<EngineStatus>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    flush_waiters: Vec<oneshot::Sender<()>>,
    stopping: Option<Vec<oneshot::Sender<()>>>,
}

impl<R: RowService> SyncEngine<R> {
    pub fn new(owner_id: Uuid, remote: Arc<R>, config: SyncConfig) -> (Self, SpaceHandle<R>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(EngineStatus {
            loading: true,
            ..EngineStatus::default()
        });

        let handle = SpaceHandle::new(owner_id, commands_tx, inbound_tx, status_rx, remote.clone());
        let engine = Self {
            space: Space::new(owner_id),
            remote,
            outbound: Outbound::new(config.debounce),
            config,
            cache: None,
            loads: LoadTracker::new(),
            tombstones: HashSet::new(),
            recheck: Vec::new(),
            status,
            commands,
            commands_open: true,
            inbound,
            completions_tx,
            completions,
            flush_waiters: Vec::new(),
            stopping: None,
        };
        (engine, handle)
    }

    /// Hydrate from and persist to an offline cache.
    pub fn with_cache(mut self, cache: SpaceCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        self.hydrate();
        self.start_load();

        loop {
            let push_at = self.outbound.deadline();
            let load_at = self.loads.deadline();

            tokio::select! {
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All handles dropped; flushing before exit");
                        self.commands_open = false;
                        self.begin_stop(None);
                    }
                },
                Some(inbound) = self.inbound.recv() => self.handle_inbound(inbound),
                Some(done) = self.completions.recv() => self.handle_completion(done),
                _ = sleep_until(push_at.unwrap_or_else(Instant::now)), if push_at.is_some() => self.push(),
                _ = sleep_until(load_at.unwrap_or_else(Instant::now)), if load_at.is_some() => self.load_timed_out(),
            }

            if self.outbound.is_idle() {
                for waiter in self.flush_waiters.drain(..) {
                    let _ = waiter.send(());
                }
                if self.stopping.is_some() {
                    break;
                }
            }
        }

        self.save_cache();
        for waiter in self.stopping.take().unwrap_or_default() {
            let _ = waiter.send(());
        }
        info!("Sync engine for {} stopped", self.space.owner_id());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Mutate(mutate) => {
                let effects = mutate(&mut self.space);
                self.apply_effects(effects);
            }
            Command::Read(read) => read(&self.space),
            Command::Load => self.start_load(),
            Command::Flush(reply) => {
                self.outbound.force();
                self.flush_waiters.push(reply);
            }
            Command::Shutdown(reply) => self.begin_stop(Some(reply)),
        }
    }

    fn apply_effects(&mut self, effects: Effects) {
        self.tombstones.extend(effects.tombstones);
        self.note_tombstones();
        for (table, id) in effects.remote_deletes {
            self.spawn_remote_delete(table, id);
        }
        if effects.force {
            self.outbound.force();
        } else if effects.changed {
            self.outbound.touch();
        }
    }

    fn begin_stop(&mut self, reply: Option<oneshot::Sender<()>>) {
        self.outbound.force();
        self.stopping.get_or_insert_with(Vec::new).extend(reply);
    }

    // -- Inbound --

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Connectivity(connected) => {
                info!("Realtime channel {}", if connected { "connected" } else { "disconnected" });
                self.status.send_modify(|s| s.connected = connected);
            }
            Inbound::Event(event) => {
                let id = event.row.id();
                if self.tombstones.contains(&id) {
                    if event.event_type == ChangeKind::Delete {
                        self.tombstones.remove(&id);
                        self.note_tombstones();
                    } else {
                        // A push that raced our delete put the row back.
                        debug!("Re-deleting resurrected {} {}", event.table().as_str(), id);
                        self.spawn_remote_delete(event.table(), id);
                    }
                    return;
                }
                let applied = reconcile::apply_event(&mut self.space, event);
                trace!("Realtime event for {}: {:?}", id, applied);
            }
        }
    }

    // -- Initial load --

    fn hydrate(&mut self) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.load(self.space.owner_id()) {
            Ok(Some(snapshot)) => {
                info!("Hydrated {} thoughts from local cache", snapshot.thoughts.len());
                self.space.restore(snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read local cache: {:#}", e),
        }
    }

    fn start_load(&mut self) {
        let generation = self.loads.begin(self.config.load_timeout);
        self.status.send_modify(|s| s.loading = true);

        let remote = self.remote.clone();
        let owner_id = self.space.owner_id();
        let tx = self.completions_tx.clone();
        let task = tokio::spawn(async move {
            let result = remote.fetch_all(owner_id).await;
            let _ = tx.send(Completion::Loaded { generation, result });
        });
        self.loads.attach(task);
        debug!("Started load generation {}", generation);
    }

    fn load_timed_out(&mut self) {
        self.loads.timed_out();
        warn!("Initial load is taking too long; showing local data");
        self.status.send_modify(|s| s.loading = false);
    }

    // -- Completions --

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Loaded { generation, result } => {
                if !self.loads.finish(generation) {
                    debug!("Dropping superseded load generation {}", generation);
                    return;
                }
                match result {
                    Ok(rows) => {
                        let fetched = rows.len();
                        let merge = reconcile::merge_load(&mut self.space, rows);
                        info!(
                            "Loaded {} rows ({} applied, {} deferred, {} orphan links pruned)",
                            fetched, merge.changed, merge.deferred, merge.pruned_links
                        );
                        self.status.send_modify(|s| {
                            s.loading = false;
                            s.last_error = None;
                        });
                        self.save_cache();
                        // Local-only rows still need to reach the server.
                        self.outbound.touch();
                    }
                    Err(e) => {
                        warn!("Initial load failed: {:#}", e);
                        self.status.send_modify(|s| {
                            s.loading = false;
                            s.last_error = Some(format!("{:#}", e));
                        });
                    }
                }
            }
            Completion::Pushed { hash, result } => {
                let landed = match result {
                    Ok(summary) => {
                        debug!(
                            "Synced: {} inserted, {} updated, {} unchanged",
                            summary.inserted, summary.updated, summary.ignored
                        );
                        self.status.send_modify(|s| {
                            s.last_synced_at = Some(Utc::now());
                            s.last_error = None;
                        });
                        Some(hash)
                    }
                    Err(e) => {
                        warn!("Sync failed, will retry on next change: {:#}", e);
                        self.status.send_modify(|s| s.last_error = Some(format!("{:#}", e)));
                        None
                    }
                };
                let again = self.outbound.landed(landed);
                for (table, id) in std::mem::take(&mut self.recheck) {
                    if self.tombstones.contains(&id) {
                        self.spawn_remote_delete(table, id);
                    }
                }
                if again {
                    self.push();
                }
            }
            Completion::Deleted { table, id, result } => {
                match result {
                    // Held until the delete echo arrives.
                    Ok(true) => trace!("Remote delete of {} {} applied", table.as_str(), id),
                    Ok(false) if self.outbound.in_flight() => {
                        debug!("No remote {} {} yet; retrying after the push lands", table.as_str(), id);
                        self.recheck.push((table, id));
                    }
                    Ok(false) => {
                        debug!("No remote {} {} to delete", table.as_str(), id);
                        self.tombstones.remove(&id);
                    }
                    Err(e) => {
                        warn!("Remote delete of {} {} failed: {:#}", table.as_str(), id, e);
                        self.tombstones.remove(&id);
                    }
                }
                self.note_tombstones();
            }
        }
    }

    // -- Outbound --

    fn push(&mut self) {
        self.save_cache();
        match self.outbound.fire(&self.space) {
            Fire::Skip => trace!("Nothing changed since last sync"),
            Fire::Queued => trace!("Sync in flight; queued another"),
            Fire::Push { rows, hash } => {
                let remote = self.remote.clone();
                let owner_id = self.space.owner_id();
                let tx = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = remote.upsert_all(owner_id, &rows).await;
                    let _ = tx.send(Completion::Pushed { hash, result });
                });
            }
        }
    }

    fn spawn_remote_delete(&self, table: Table, id: Uuid) {
        let remote = self.remote.clone();
        let owner_id = self.space.owner_id();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = remote.delete_row(owner_id, table, id).await;
            let _ = tx.send(Completion::Deleted { table, id, result });
        });
    }

    fn note_tombstones(&self) {
        let count = self.tombstones.len();
        self.status.send_if_modified(|s| {
            let changed = s.pending_deletes != count;
            s.pending_deletes = count;
            changed
        });
    }

    fn save_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(&self.space.snapshot()) {
                warn!("Failed to write local cache: {:#}", e);
            }
        }
    }
}
