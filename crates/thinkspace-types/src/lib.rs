pub mod api;
pub mod events;
pub mod models;

pub use events::{ChangeEvent, ChangeKind, Row, Table};
pub use models::{ChainLink, Thought, ThoughtChain, ThoughtState};
