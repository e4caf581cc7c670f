use std::sync::Arc;

use thinkspace_db::Database;
use thinkspace_gateway::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> AppState {
        Arc::new(Self { db, dispatcher })
    }
}
