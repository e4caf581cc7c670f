//! Row service over HTTP: list, upsert and delete per owner and table.
//! Every accepted write is published to the realtime dispatcher.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use thinkspace_db::{Database, Published};
use thinkspace_types::api::{DeleteResponse, UpsertSummary};
use thinkspace_types::{ChainLink, ChangeEvent, Thought, ThoughtChain};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/owners/{owner_id}/thoughts", get(list_thoughts).put(put_thoughts))
        .route("/owners/{owner_id}/thoughts/{id}", delete(delete_thought))
        .route("/owners/{owner_id}/chains", get(list_chains).put(put_chains))
        .route("/owners/{owner_id}/chains/{id}", delete(delete_chain))
        .route("/owners/{owner_id}/links", get(list_links).put(put_links))
        .route("/owners/{owner_id}/links/{id}", delete(delete_link))
        .with_state(state)
}

/// Run a database call off the async runtime.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// Rows in a batch must all belong to the owner in the path.
fn check_owner(owner_id: Uuid, row_owners: impl IntoIterator<Item = Uuid>) -> Result<(), StatusCode> {
    if row_owners.into_iter().any(|o| o != owner_id) {
        warn!("Rejected batch with rows not owned by {}", owner_id);
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}

fn publish(state: &AppState, published: Published) -> Json<UpsertSummary> {
    debug!(
        "Upsert: {} inserted, {} updated, {} ignored",
        published.summary.inserted, published.summary.updated, published.summary.ignored
    );
    state.dispatcher.publish(published.events);
    Json(published.summary)
}

fn retracted(state: &AppState, events: Vec<ChangeEvent>) -> Json<DeleteResponse> {
    let deleted = !events.is_empty();
    state.dispatcher.publish(events);
    Json(DeleteResponse { deleted })
}

// -- Thoughts --

pub async fn list_thoughts(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> Result<Json<Vec<Thought>>, StatusCode> {
    blocking(&state, move |db| db.list_thoughts(owner_id)).await.map(Json)
}

pub async fn put_thoughts(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Json(rows): Json<Vec<Thought>>,
) -> Result<Json<UpsertSummary>, StatusCode> {
    check_owner(owner_id, rows.iter().map(|t| t.owner_id))?;
    let published = blocking(&state, move |db| db.publish_thoughts(&rows)).await?;
    Ok(publish(&state, published))
}

pub async fn delete_thought(
    State(state): State<AppState>,
    Path((owner_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeleteResponse>, StatusCode> {
    let events = blocking(&state, move |db| db.retract_thought(owner_id, id)).await?;
    Ok(retracted(&state, events))
}

// -- Chains --

pub async fn list_chains(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> Result<Json<Vec<ThoughtChain>>, StatusCode> {
    blocking(&state, move |db| db.list_chains(owner_id)).await.map(Json)
}

pub async fn put_chains(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Json(rows): Json<Vec<ThoughtChain>>,
) -> Result<Json<UpsertSummary>, StatusCode> {
    check_owner(owner_id, rows.iter().map(|c| c.owner_id))?;
    let published = blocking(&state, move |db| db.publish_chains(&rows)).await?;
    Ok(publish(&state, published))
}

/// Removes the chain's thoughts and links as well.
pub async fn delete_chain(
    State(state): State<AppState>,
    Path((owner_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeleteResponse>, StatusCode> {
    let events = blocking(&state, move |db| db.retract_chain(owner_id, id)).await?;
    Ok(retracted(&state, events))
}

// -- Links --

pub async fn list_links(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> Result<Json<Vec<ChainLink>>, StatusCode> {
    blocking(&state, move |db| db.list_links(owner_id)).await.map(Json)
}

/// Insert-or-ignore; a pair that already exists in either direction is
/// counted as ignored.
pub async fn put_links(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Json(rows): Json<Vec<ChainLink>>,
) -> Result<Json<UpsertSummary>, StatusCode> {
    check_owner(owner_id, rows.iter().map(|l| l.owner_id))?;
    if rows.iter().any(|l| l.from_chain_id == l.to_chain_id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let published = blocking(&state, move |db| db.publish_links(&rows)).await?;
    Ok(publish(&state, published))
}

pub async fn delete_link(
    State(state): State<AppState>,
    Path((owner_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeleteResponse>, StatusCode> {
    let events = blocking(&state, move |db| db.retract_link(owner_id, id)).await?;
    Ok(retracted(&state, events))
}
