//! Address-brokered signaling relay for WebRTC clients.
//!
//! Browser and native clients open a persistent binary websocket to the
//! relay; the relay keeps a per-application namespace of string addresses
//! clients may listen on, brokers listeners and connectors into peer
//! pairings named by per-side connection ids, and forwards opaque signaling
//! payloads between paired clients. It has no knowledge of WebRTC itself —
//! no SDP or ICE parsing, no message inspection, no persistence.
//!
//! # Architecture
//!
//! ```text
//! socket bytes → SignalingSocket (framing, heartbeat, version)
//!     → NetworkEvent → PeerPool dispatch
//!     → (address lookup | pair lookup) → paired session's outbound queue
//!     → SignalingSocket → socket bytes
//! ```
//!
//! One [`PeerPool`] exists per configured application path. All relay state
//! of a pool — its session table, listener map, and every session's pair
//! map — mutates under the pool's single serializer lock, which is what
//! keeps both sides of every pairing consistent through disconnects and
//! timeouts.
//!
//! # Example
//!
//! ```no_run
//! use signal_relay::{Config, RelayServer};
//!
//! # async fn example() -> signal_relay::Result<()> {
//! let config = Config::default();
//! let handle = RelayServer::new(config)?.start().await?;
//! println!("listening on {:?}", handle.local_addr());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod transport;

pub use config::{AppConfig, Config, HttpConfig, HttpsConfig};
pub use error::{Error, Result};
pub use peer::pool::PeerPool;
pub use peer::session::{SessionId, SessionState};
pub use protocol::codec;
pub use protocol::event::{
    ConnectionId, NetEventType, NetworkEvent, Payload, FIRST_INCOMING_ID, INVALID_CONNECTION_ID,
    MAX_ADDRESS_LENGTH,
};
pub use protocol::{MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
pub use server::admission::TokenStore;
pub use server::{RelayHandle, RelayServer};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
