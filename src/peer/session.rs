//! Per-client session state.
//!
//! A [`PeerSession`] lives inside its pool's session table and is only ever
//! touched under the pool's serializer lock. Pair-map entries hold
//! [`SessionId`] handles into that table rather than references, so cleanup
//! invalidates a pairing by removing the handle on both sides.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::event::{
    ConnectionId, NetEventType, NetworkEvent, FIRST_INCOMING_ID, INVALID_CONNECTION_ID,
};

/// Handle to a session inside its pool's session table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Session lifecycle, forward-only in practice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Server-side state for one connected client
#[derive(Debug)]
pub struct PeerSession {
    pub(crate) id: SessionId,
    pub(crate) state: SessionState,
    /// Pair map: local connection id to the paired session's handle
    pub(crate) connections: HashMap<ConnectionId, SessionId>,
    pub(crate) next_incoming_id: ConnectionId,
    /// At most one address this session is listening on
    pub(crate) own_address: Option<String>,
    client_tx: mpsc::UnboundedSender<NetworkEvent>,
}

impl PeerSession {
    pub(crate) fn new(id: SessionId, client_tx: mpsc::UnboundedSender<NetworkEvent>) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            connections: HashMap::new(),
            next_incoming_id: FIRST_INCOMING_ID,
            own_address: None,
            client_tx,
        }
    }

    /// Queue an event for delivery to this session's client.
    ///
    /// The gate admits Connected and Disconnecting: cleanup notifications are
    /// emitted while Disconnecting, and only a fully Disconnected session is
    /// silenced.
    pub(crate) fn send_to_client(&self, event: NetworkEvent) {
        match self.state {
            SessionState::Connected | SessionState::Disconnecting => {
                if self.client_tx.send(event).is_err() {
                    debug!(session = %self.id, "client channel closed, outbound event dropped");
                }
            }
            state => {
                debug!(session = %self.id, ?state, "outbound event suppressed by state gate");
            }
        }
    }

    /// Allocate a fresh incoming id, pair it with `other`, and notify the
    /// client. Returns the allocated id.
    pub(crate) fn accept_incoming_connection(&mut self, other: SessionId) -> ConnectionId {
        let id = self.next_incoming_id;
        // incoming ids stay below i16::MAX; the id space wraps, not overflows
        self.next_incoming_id = if id >= ConnectionId::MAX - 1 {
            warn!(session = %self.id, "incoming id space exhausted, wrapping");
            FIRST_INCOMING_ID
        } else {
            id + 1
        };
        if let Some(displaced) = self.connections.insert(id, other) {
            warn!(session = %self.id, connection = id, ?displaced, "incoming id displaced an existing pairing");
        }
        self.send_to_client(NetworkEvent::simple(NetEventType::NewConnection, id));
        id
    }

    /// Pair the client-chosen `id` with `other` and notify the client
    pub(crate) fn accept_outgoing_connection(&mut self, other: SessionId, id: ConnectionId) {
        if let Some(displaced) = self.connections.insert(id, other) {
            warn!(session = %self.id, connection = id, ?displaced, "outgoing id displaced an existing pairing");
        }
        self.send_to_client(NetworkEvent::simple(NetEventType::NewConnection, id));
    }

    /// Refuse a connection attempt
    pub(crate) fn deny_connection(&self, address: &str, id: ConnectionId) {
        debug!(session = %self.id, address, connection = id, "connection denied");
        self.send_to_client(NetworkEvent::simple(NetEventType::ConnectionFailed, id));
    }

    /// Record the address this session now listens on and notify the client
    pub(crate) fn accept_listening(&mut self, address: &str) {
        self.own_address = Some(address.to_string());
        self.send_to_client(NetworkEvent::with_text(
            NetEventType::ServerInitialized,
            INVALID_CONNECTION_ID,
            address,
        ));
    }

    /// Refuse a listen request
    pub(crate) fn deny_listening(&self, address: &str) {
        debug!(session = %self.id, address, "listen denied");
        self.send_to_client(NetworkEvent::with_text(
            NetEventType::ServerInitFailed,
            INVALID_CONNECTION_ID,
            address,
        ));
    }

    /// Find the local id this session uses for its pairing with `other`.
    ///
    /// Linear search; pair maps are small.
    pub(crate) fn connection_id_for(&self, other: SessionId) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, session)| **session == other)
            .map(|(id, _)| *id)
    }
}
