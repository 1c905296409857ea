//! Mock Provider Servers
//!
//! Local stand-ins for the Watson recognize WebSocket, bound to ephemeral ports.

pub mod websocket_mock;

use std::net::SocketAddr;

/// Recognize URL for a mock bound to `addr`
pub fn recognize_url(addr: SocketAddr) -> String {
    format!("ws://{}/v1/recognize", addr)
}
