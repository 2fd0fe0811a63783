//! HTTP read API and websocket fan-out.

pub mod handlers;
pub mod report;
pub mod server;
pub mod state;
pub mod websocket;

pub use server::ApiServer;
pub use state::AppState;
