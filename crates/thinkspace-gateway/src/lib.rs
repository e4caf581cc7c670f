//! Realtime fan-out: accepted row changes go out to every WebSocket
//! subscribed to the owning account.

pub mod connection;
pub mod dispatcher;

pub use dispatcher::Dispatcher;
