//! WebSocket support for live views.
//!
//! Clients connect per entity and receive the visible rows whenever they
//! change, plus sync progress events. They can also trigger a sync or a
//! refresh over the same connection.

mod handler;
mod protocol;

pub use handler::handle_live_connection;
pub use protocol::*;
