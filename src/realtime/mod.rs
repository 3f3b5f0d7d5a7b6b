//! Real-time push to dashboard clients over WebSocket

mod hub;
pub mod protocol;
mod socket;


pub use hub::{HubSettings, RealtimeHub};
pub use socket::ws_handler;
