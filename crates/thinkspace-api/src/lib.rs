pub mod rows;
pub mod state;

pub use state::{AppState, AppStateInner};
