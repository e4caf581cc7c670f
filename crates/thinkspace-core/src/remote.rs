use std::future::Future;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use thinkspace_types::api::{DeleteResponse, UpsertSummary};
use thinkspace_types::{ChainLink, Table, Thought, ThoughtChain};

/// One owner's rows across the three tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub thoughts: Vec<Thought>,
    pub chains: Vec<ThoughtChain>,
    pub links: Vec<ChainLink>,
}

impl RowSet {
    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty() && self.chains.is_empty() && self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.thoughts.len() + self.chains.len() + self.links.len()
    }
}

/// The shared row store the sync engine talks to.
///
/// Upserts are idempotent and keyed by id; links are insert-or-ignore.
/// Every row is scoped to one owner.
pub trait RowService: Send + Sync + 'static {
    fn fetch_all(&self, owner_id: Uuid) -> impl Future<Output = Result<RowSet>> + Send;

    /// Upsert chains, then thoughts, then links.
    fn upsert_all(&self, owner_id: Uuid, rows: &RowSet) -> impl Future<Output = Result<UpsertSummary>> + Send;

    /// Insert a single link. `Ok(false)` when the pair already existed.
    fn insert_link(&self, link: &ChainLink) -> impl Future<Output = Result<bool>> + Send;

    /// Delete one row by id. `Ok(false)` when there was nothing to delete.
    fn delete_row(&self, owner_id: Uuid, table: Table, id: Uuid) -> impl Future<Output = Result<bool>> + Send;
}

/// Row service reached over the HTTP API of `thinkspace-server`.
#[derive(Clone)]
pub struct HttpRowService {
    client: Client,
    base_url: String,
}

impl HttpRowService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn table_url(&self, owner_id: Uuid, table: Table) -> String {
        format!("{}/owners/{}/{}", self.base_url, owner_id, path_segment(table))
    }

    async fn get_table<T: serde::de::DeserializeOwned>(&self, owner_id: Uuid, table: Table) -> Result<Vec<T>> {
        let rows = self
            .client
            .get(self.table_url(owner_id, table))
            .send()
            .await
            .with_context(|| format!("GET {} failed", table.as_str()))?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows)
    }

    async fn put_table<T: Serialize>(&self, owner_id: Uuid, table: Table, rows: &[T]) -> Result<UpsertSummary> {
        if rows.is_empty() {
            return Ok(UpsertSummary::default());
        }
        let summary = self
            .client
            .put(self.table_url(owner_id, table))
            .json(rows)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", table.as_str()))?
            .error_for_status()?
            .json()
            .await?;
        Ok(summary)
    }
}

/// URL segment for a table on the HTTP API.
pub fn path_segment(table: Table) -> &'static str {
    match table {
        Table::Thoughts => "thoughts",
        Table::ThoughtChains => "chains",
        Table::ChainLinks => "links",
    }
}

impl RowService for HttpRowService {
    async fn fetch_all(&self, owner_id: Uuid) -> Result<RowSet> {
        let (thoughts, chains, links) = tokio::try_join!(
            self.get_table(owner_id, Table::Thoughts),
            self.get_table(owner_id, Table::ThoughtChains),
            self.get_table(owner_id, Table::ChainLinks),
        )?;
        Ok(RowSet { thoughts, chains, links })
    }

    async fn upsert_all(&self, owner_id: Uuid, rows: &RowSet) -> Result<UpsertSummary> {
        let mut total = UpsertSummary::default();
        for summary in [
            self.put_table(owner_id, Table::ThoughtChains, &rows.chains).await?,
            self.put_table(owner_id, Table::Thoughts, &rows.thoughts).await?,
            self.put_table(owner_id, Table::ChainLinks, &rows.links).await?,
        ] {
            total.inserted += summary.inserted;
            total.updated += summary.updated;
            total.ignored += summary.ignored;
        }
        Ok(total)
    }

    async fn insert_link(&self, link: &ChainLink) -> Result<bool> {
        let summary = self
            .put_table(link.owner_id, Table::ChainLinks, std::slice::from_ref(link))
            .await?;
        Ok(summary.inserted > 0)
    }

    async fn delete_row(&self, owner_id: Uuid, table: Table, id: Uuid) -> Result<bool> {
        let response: DeleteResponse = self
            .client
            .delete(format!("{}/{}", self.table_url(owner_id, table), id))
            .send()
            .await
            .with_context(|| format!("DELETE {} {} failed", table.as_str(), id))?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.deleted)
    }
}
