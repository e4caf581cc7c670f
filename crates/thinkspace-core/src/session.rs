//! A running client: engine, HTTP row service, realtime feed and optional
//! offline cache, all wired from one `SyncConfig`.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::cache::SpaceCache;
use crate::config::SyncConfig;
use crate::realtime::RealtimeClient;
use crate::remote::HttpRowService;
use crate::search::HttpSearch;
use crate::sync::{SpaceHandle, SyncEngine};

pub struct Session {
    pub handle: SpaceHandle<HttpRowService>,
    pub search: Option<HttpSearch>,
    engine: JoinHandle<()>,
    realtime: RealtimeClient,
}

impl Session {
    /// Start syncing `owner_id` against `config.api_url`.
    pub fn start(owner_id: Uuid, config: SyncConfig) -> Result<Self> {
        let remote = Arc::new(HttpRowService::new(config.api_url.clone()));
        let cache = config.cache_path.as_deref().map(SpaceCache::open).transpose()?;
        let realtime_url = config.realtime_url(owner_id);
        let search = config.search_url.clone().map(HttpSearch::new);

        let (engine, handle) = SyncEngine::new(owner_id, remote, config);
        let engine = match cache {
            Some(cache) => engine.with_cache(cache),
            None => engine,
        };
        let engine = engine.spawn();
        let realtime = RealtimeClient::connect(realtime_url, handle.inbound());

        info!("Session started for {}", owner_id);
        Ok(Self {
            handle,
            search,
            engine,
            realtime,
        })
    }

    /// `start` with settings read from `THINKSPACE_*` variables.
    pub fn from_env(owner_id: Uuid) -> Result<Self> {
        Self::start(owner_id, SyncConfig::from_env()?)
    }

    /// Flush pending changes, persist the cache and stop every task.
    pub async fn close(self) -> Result<()> {
        self.realtime.close();
        self.handle.shutdown().await?;
        self.engine.await?;
        Ok(())
    }
}
