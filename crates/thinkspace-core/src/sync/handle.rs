use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::warn;
use uuid::Uuid;

use thinkspace_types::api::SearchResult;
use thinkspace_types::{ChainLink, ChangeEvent, Table, Thought, ThoughtChain};

use crate::error::SpaceError;
use crate::remote::RowService;
use crate::scope::Scope;
use crate::search::{SearchClient, run_search};
use crate::space::{ChainRemoval, Space, SpaceEvent, SpaceSnapshot};
use crate::thoughts::CommitOutcome;

use super::{Command, Effects, EngineStatus, Inbound};

/// Result of a user action that also has to reach the row service. The
/// local change is kept even when `persisted` is false.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmed<T> {
    pub value: T,
    pub persisted: bool,
}

/// Cloneable front door to a running `SyncEngine`.
pub struct SpaceHandle<R> {
    owner_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    inbound: mpsc::UnboundedSender<Inbound>,
    status: watch::Receiver<EngineStatus>,
    remote: Arc<R>,
}

impl<R> Clone for SpaceHandle<R> {
    fn clone(&self) -> Self {
        Self {
            owner_id: self.owner_id,
            commands: self.commands.clone(),
            inbound: self.inbound.clone(),
            status: self.status.clone(),
            remote: self.remote.clone(),
        }
    }
}

/// Pair a store result with its effects; a rejected action has none.
fn checked<T>(result: Result<T, SpaceError>, effects: Effects) -> (Result<T, SpaceError>, Effects) {
    match result {
        Ok(value) => (Ok(value), effects),
        Err(e) => (Err(e), Effects::none()),
    }
}

/// Effects of committing whatever draft was active before an action.
fn previous_commit(previous: Option<&CommitOutcome>) -> Effects {
    match previous {
        Some(CommitOutcome::Discarded(t)) => Effects::changed().delete_remote(Table::Thoughts, t.id),
        Some(outcome) if outcome.is_new_anchor() => Effects::changed().forced(),
        _ => Effects::changed(),
    }
}

impl<R: RowService> SpaceHandle<R> {
    pub(super) fn new(
        owner_id: Uuid,
        commands: mpsc::UnboundedSender<Command>,
        inbound: mpsc::UnboundedSender<Inbound>,
        status: watch::Receiver<EngineStatus>,
        remote: Arc<R>,
    ) -> Self {
        Self {
            owner_id,
            commands,
            inbound,
            status,
            remote,
        }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Space) -> (T, Effects) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let command = Command::Mutate(Box::new(move |space| {
            let (value, effects) = f(space);
            let _ = tx.send(value);
            effects
        }));
        self.commands.send(command).map_err(|_| anyhow!("sync engine stopped"))?;
        rx.await.map_err(|_| anyhow!("sync engine stopped"))
    }

    /// Run `f` against the current state inside the engine.
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Space) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let command = Command::Read(Box::new(move |space| {
            let _ = tx.send(f(space));
        }));
        self.commands.send(command).map_err(|_| anyhow!("sync engine stopped"))?;
        rx.await.map_err(|_| anyhow!("sync engine stopped"))
    }

    // -- Thoughts --

    /// Start a new draft, committing any previous one.
    pub async fn create_thought(&self) -> Result<Thought> {
        self.mutate(|space| {
            let (thought, previous) = space.create_thought();
            let effects = previous_commit(previous.as_ref());
            (thought, effects)
        })
        .await
    }

    pub async fn update_thought(&self, id: Uuid, content: impl Into<String>) -> Result<Thought> {
        let content = content.into();
        self.mutate(move |space| checked(space.update_thought(id, &content), Effects::changed()))
            .await?
            .map_err(Into::into)
    }

    /// Anchors are pushed immediately; an empty draft is deleted remotely.
    pub async fn commit_thought(&self, id: Uuid) -> Result<CommitOutcome> {
        self.mutate(move |space| match space.commit_thought(id) {
            Ok(outcome) => {
                let effects = previous_commit(Some(&outcome));
                (Ok(outcome), effects)
            }
            Err(e) => (Err(e), Effects::none()),
        })
        .await?
        .map_err(Into::into)
    }

    pub async fn reactivate_thought(&self, id: Uuid) -> Result<Thought> {
        self.mutate(move |space| match space.reactivate_thought(id) {
            Ok((thought, previous)) => (Ok(thought), previous_commit(previous.as_ref())),
            Err(e) => (Err(e), Effects::none()),
        })
        .await?
        .map_err(Into::into)
    }

    /// Local delete; a failed remote delete is logged and never rolled back.
    pub async fn delete_thought(&self, id: Uuid) -> Result<Thought> {
        let effects = Effects::changed().delete_remote(Table::Thoughts, id);
        self.mutate(move |space| checked(space.delete_thought(id), effects))
            .await?
            .map_err(Into::into)
    }

    pub async fn label_thought(&self, id: Uuid, label: Option<String>) -> Result<Thought> {
        self.mutate(move |space| checked(space.label_thought(id, label), Effects::changed()))
            .await?
            .map_err(Into::into)
    }

    pub async fn move_thought(&self, id: Uuid, chain_id: Uuid) -> Result<Thought> {
        self.mutate(move |space| checked(space.move_thought(id, chain_id), Effects::changed()))
            .await?
            .map_err(Into::into)
    }

    // -- Chains --

    pub async fn create_chain(&self) -> Result<ThoughtChain> {
        self.mutate(|space| (space.create_chain(), Effects::changed())).await
    }

    pub async fn break_chain(&self, from: Option<Uuid>, at: Option<Uuid>) -> Result<ThoughtChain> {
        self.mutate(move |space| checked(space.break_chain(from, at), Effects::changed()))
            .await?
            .map_err(Into::into)
    }

    pub async fn label_chain(&self, id: Uuid, label: Option<String>) -> Result<ThoughtChain> {
        self.mutate(move |space| checked(space.label_chain(id, label), Effects::changed()))
            .await?
            .map_err(Into::into)
    }

    pub async fn set_active_chain(&self, id: Option<Uuid>) -> Result<()> {
        self.mutate(move |space| (space.set_active_chain(id), Effects::none()))
            .await?
            .map_err(Into::into)
    }

    /// Cascading delete. The server cascades on its side too.
    pub async fn delete_chain(&self, id: Uuid) -> Result<Confirmed<ChainRemoval>> {
        let removal = self
            .mutate(move |space| match space.delete_chain(id) {
                Ok(removal) => {
                    let mut effects = Effects::changed().tombstone(id);
                    for t in &removal.thoughts {
                        effects = effects.tombstone(t.id);
                    }
                    for l in &removal.links {
                        effects = effects.tombstone(l.id);
                    }
                    (Ok(removal), effects)
                }
                Err(e) => (Err(e), Effects::none()),
            })
            .await??;

        let persisted = self.confirm(self.remote.delete_row(self.owner_id, Table::ThoughtChains, id).await);
        Ok(Confirmed {
            value: removal,
            persisted,
        })
    }

    // -- Links & scope --

    pub async fn create_link(&self, a: Uuid, b: Uuid) -> Result<Confirmed<ChainLink>> {
        let link = self
            .mutate(move |space| checked(space.create_link(a, b), Effects::changed()))
            .await??;

        let persisted = self.confirm(self.remote.insert_link(&link).await);
        Ok(Confirmed { value: link, persisted })
    }

    pub async fn delete_link(&self, id: Uuid) -> Result<Confirmed<ChainLink>> {
        let link = self
            .mutate(move |space| checked(space.delete_link(id), Effects::changed().tombstone(id)))
            .await??;

        let persisted = self.confirm(self.remote.delete_row(self.owner_id, Table::ChainLinks, id).await);
        Ok(Confirmed { value: link, persisted })
    }

    fn confirm<T>(&self, result: Result<T>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Row service rejected action for {}: {:#}", self.owner_id, e);
                false
            }
        }
    }

    pub async fn set_scope(&self, scope: Scope) -> Result<()> {
        self.mutate(move |space| (space.set_scope(scope), Effects::none())).await
    }

    /// Run a similarity search and switch the feed to its hits.
    pub async fn search<S: SearchClient>(&self, client: &S, query: &str, limit: u32) -> Result<Vec<SearchResult>> {
        let hits = run_search(client, self.owner_id, query, limit).await?;
        let shown = hits.clone();
        self.mutate(move |space| (space.show_search(shown), Effects::none())).await?;
        Ok(hits)
    }

    // -- Reads --

    pub async fn visible_thoughts(&self) -> Result<Vec<Thought>> {
        self.read(|space| space.visible_thoughts().into_iter().cloned().collect()).await
    }

    pub async fn listed_chains(&self) -> Result<Vec<(ThoughtChain, String)>> {
        self.read(|space| {
            space
                .listed_chains()
                .into_iter()
                .map(|(chain, title)| (chain.clone(), title))
                .collect()
        })
        .await
    }

    pub async fn merge_set(&self, chain_id: Uuid) -> Result<BTreeSet<Uuid>> {
        self.read(move |space| space.merge_set(chain_id)).await
    }

    pub async fn thought(&self, id: Uuid) -> Result<Option<Thought>> {
        self.read(move |space| space.thought(id).cloned()).await
    }

    pub async fn chain(&self, id: Uuid) -> Result<Option<ThoughtChain>> {
        self.read(move |space| space.chain(id).cloned()).await
    }

    pub async fn snapshot(&self) -> Result<SpaceSnapshot> {
        self.read(|space| space.snapshot()).await
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<SpaceEvent>> {
        self.read(|space| space.subscribe()).await
    }

    // -- Engine control --

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    /// Wait until the current load finished or timed out.
    pub async fn loaded(&self) -> Result<EngineStatus> {
        let mut status = self.status.clone();
        let current = status.wait_for(|s| !s.loading).await?.clone();
        Ok(current)
    }

    /// Start a new initial load, aborting any in flight.
    pub fn load(&self) -> Result<()> {
        self.commands.send(Command::Load).map_err(|_| anyhow!("sync engine stopped"))
    }

    /// Push now and wait for the outbound queue to drain.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Flush(tx)).map_err(|_| anyhow!("sync engine stopped"))?;
        rx.await.map_err(|_| anyhow!("sync engine stopped"))
    }

    /// Flush, persist the cache, and stop the engine.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Shutdown(tx)).map_err(|_| anyhow!("sync engine stopped"))?;
        rx.await.map_err(|_| anyhow!("sync engine stopped"))
    }

    /// Sender for the realtime channel to feed.
    pub fn inbound(&self) -> mpsc::UnboundedSender<Inbound> {
        self.inbound.clone()
    }

    /// Deliver one realtime event.
    pub fn deliver(&self, event: ChangeEvent) -> Result<()> {
        self.inbound
            .send(Inbound::Event(event))
            .map_err(|_| anyhow!("sync engine stopped"))
    }
}
