//! Outbound connection to the game server.
//!
//! - `Channel`: what event writers see (tri-state readiness plus a text write).
//! - `WsChannel`: WebSocket client whose lifecycle is owned by a supervisor thread.
//! - `MemoryChannel`: in-process recorder for dry runs and tests.

mod channel;
mod endpoint;
mod websocket;

pub use channel::{Channel, ChannelState, MemoryChannel, StateCell};
pub use endpoint::{parse_ws_endpoint, WsEndpoint};
pub use websocket::{WsChannel, WsConfig};
