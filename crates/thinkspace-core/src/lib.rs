//! Thinkspace core: the thought/chain lifecycle and the sync engine that keeps
//! an optimistic local copy consistent with the shared row service.
//!
//! - `thoughts`, `chains`, `links`: owned stores, mutated only through their APIs
//! - `scope`: pure feed projections over the stores
//! - `gesture`: pull-to-break input state machine
//! - `space`: the per-owner aggregate with observer events
//! - `sync`: reconciliation, debounced outbound upserts, realtime inbound, initial load
//! - `session`: engine plus HTTP row service and realtime feed from one config

pub mod cache;
pub mod chains;
pub mod clock;
pub mod config;
pub mod embedded;
pub mod error;
pub mod gesture;
pub mod links;
pub mod realtime;
pub mod remote;
pub mod scope;
pub mod search;
pub mod session;
pub mod space;
pub mod sync;
pub mod thoughts;

pub use config::SyncConfig;
pub use error::SpaceError;
pub use gesture::{GestureConfig, GestureEffect, GestureInput, GestureState};
pub use remote::{HttpRowService, RowService, RowSet};
pub use scope::Scope;
pub use session::Session;
pub use space::{Space, SpaceEvent, SpaceSnapshot};
pub use sync::{EngineStatus, SpaceHandle, SyncEngine};
pub use thoughts::CommitOutcome;
