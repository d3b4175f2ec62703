//! Per-application session registry and brokering.
//!
//! A [`PeerPool`] owns every session of one application namespace together
//! with its address listener map. All relay state mutates under the pool's
//! single serializer lock: at any instant at most one operation runs against
//! the pool and the sessions registered in it, which is what keeps both
//! sides of every pairing consistent without per-session locks. The lock is
//! never held across socket I/O; delivery to a client is an unbounded
//! channel send.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::session::{PeerSession, SessionId, SessionState};
use crate::protocol::event::{
    ConnectionId, NetEventType, NetworkEvent, INVALID_CONNECTION_ID, MAX_ADDRESS_LENGTH,
};

/// One application namespace worth of relay state
pub struct PeerPool {
    name: String,
    address_sharing: bool,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    sessions: HashMap<SessionId, PeerSession>,
    /// Address to the sessions listening on it
    listeners: HashMap<String, Vec<SessionId>>,
    next_session_id: u64,
}

impl PeerPool {
    pub fn new(name: impl Into<String>, address_sharing: bool) -> Self {
        Self {
            name: name.into(),
            address_sharing,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Logical name for logs
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address_sharing(&self) -> bool {
        self.address_sharing
    }

    /// Admit a new client. `client_tx` is the session's outbound event queue,
    /// drained by the socket that owns the connection.
    pub async fn register_session(
        &self,
        client_tx: mpsc::UnboundedSender<NetworkEvent>,
    ) -> SessionId {
        let mut state = self.state.lock().await;
        let id = SessionId(state.next_session_id);
        state.next_session_id += 1;
        let mut session = PeerSession::new(id, client_tx);
        session.state = SessionState::Connected;
        state.sessions.insert(id, session);
        info!(
            pool = %self.name,
            session = %id,
            sessions = state.sessions.len(),
            "session joined"
        );
        id
    }

    /// Number of active sessions
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Number of sessions listening on `address`
    pub async fn listener_count(&self, address: &str) -> usize {
        self.state
            .lock()
            .await
            .listeners
            .get(address)
            .map_or(0, Vec::len)
    }

    /// Dispatch one client-originated event against the relay state machine
    pub async fn handle_client_event(&self, session_id: SessionId, event: NetworkEvent) {
        let mut state = self.state.lock().await;
        match event.event_type {
            NetEventType::NewConnection => match event.payload.as_text() {
                Some(address) => {
                    let address = address.to_string();
                    self.on_connection_request(&mut state, session_id, &address, event.connection_id);
                }
                None => {
                    warn!(pool = %self.name, session = %session_id, "connection request without address");
                    if let Some(session) = state.sessions.get(&session_id) {
                        session.deny_connection("", event.connection_id);
                    }
                }
            },
            NetEventType::Disconnected => {
                self.teardown_pairing(&mut state, session_id, event.connection_id);
            }
            NetEventType::ServerInitialized => match event.payload.as_text() {
                Some(address) => {
                    let address = address.to_string();
                    // listening again implicitly releases the previous address
                    if let Some(previous) = state
                        .sessions
                        .get_mut(&session_id)
                        .and_then(|session| session.own_address.take())
                    {
                        debug!(pool = %self.name, session = %session_id, %previous, "releasing address before re-listen");
                        Self::remove_listener(&mut state, session_id, &previous);
                    }
                    self.on_listening_request(&mut state, session_id, &address);
                }
                None => {
                    warn!(pool = %self.name, session = %session_id, "listen request without address");
                }
            },
            NetEventType::ServerClosed => {
                let address = state
                    .sessions
                    .get_mut(&session_id)
                    .and_then(|session| session.own_address.take());
                match address {
                    Some(address) => {
                        Self::remove_listener(&mut state, session_id, &address);
                        if let Some(session) = state.sessions.get(&session_id) {
                            session.send_to_client(NetworkEvent::simple(
                                NetEventType::ServerClosed,
                                INVALID_CONNECTION_ID,
                            ));
                        }
                    }
                    None => {
                        warn!(pool = %self.name, session = %session_id, "stop listening without an active address");
                    }
                }
            }
            NetEventType::ReliableMessageReceived | NetEventType::UnreliableMessageReceived => {
                self.forward_message(&mut state, session_id, event);
            }
            NetEventType::ConnectionFailed | NetEventType::ServerInitFailed => {
                // never valid from a client
                debug!(pool = %self.name, session = %session_id, event_type = ?event.event_type, "ignoring client event");
            }
            NetEventType::FatalError | NetEventType::Warning | NetEventType::Log => {
                debug!(pool = %self.name, session = %session_id, event_type = ?event.event_type, "ignoring client event");
            }
            NetEventType::Invalid | NetEventType::MetaVersion | NetEventType::MetaHeartbeat => {
                warn!(pool = %self.name, session = %session_id, event_type = ?event.event_type, "unexpected event in relay position");
            }
        }
    }

    /// Tear a session down on any disconnect path. Idempotent: a session
    /// already disconnecting, or no longer known, is left alone.
    pub async fn cleanup_session(&self, session_id: SessionId) {
        let mut state = self.state.lock().await;
        let Some(session) = state.sessions.get_mut(&session_id) else {
            warn!(pool = %self.name, session = %session_id, "cleanup for unknown session");
            return;
        };
        if matches!(
            session.state,
            SessionState::Disconnecting | SessionState::Disconnected
        ) {
            debug!(pool = %self.name, session = %session_id, "cleanup already in progress");
            return;
        }
        session.state = SessionState::Disconnecting;

        // the pair map mutates during teardown, so snapshot the keys
        let pair_ids: Vec<ConnectionId> = session.connections.keys().copied().collect();
        let own_address = session.own_address.take();

        for connection_id in pair_ids {
            self.teardown_pairing(&mut state, session_id, connection_id);
        }

        if let Some(address) = own_address {
            Self::remove_listener(&mut state, session_id, &address);
            if let Some(session) = state.sessions.get(&session_id) {
                session.send_to_client(NetworkEvent::simple(
                    NetEventType::ServerClosed,
                    INVALID_CONNECTION_ID,
                ));
            }
        }

        // dropping the session closes its outbound queue, which the owning
        // socket observes as its signal to dispose the connection
        if let Some(mut session) = state.sessions.remove(&session_id) {
            session.state = SessionState::Disconnected;
        }
        info!(
            pool = %self.name,
            session = %session_id,
            sessions = state.sessions.len(),
            "session closed"
        );
    }

    fn is_available(&self, state: &PoolState, address: &str) -> bool {
        if address.encode_utf16().count() > MAX_ADDRESS_LENGTH {
            return false;
        }
        match state.listeners.get(address) {
            Some(listeners) => listeners.is_empty() || self.address_sharing,
            None => true,
        }
    }

    fn on_listening_request(&self, state: &mut PoolState, session_id: SessionId, address: &str) {
        if !self.is_available(state, address) {
            if let Some(session) = state.sessions.get(&session_id) {
                session.deny_listening(address);
            }
            return;
        }

        state
            .listeners
            .entry(address.to_string())
            .or_default()
            .push(session_id);
        let Some(session) = state.sessions.get_mut(&session_id) else {
            error!(pool = %self.name, session = %session_id, "listen request from unknown session");
            Self::remove_listener(state, session_id, address);
            return;
        };
        session.accept_listening(address);
        debug!(pool = %self.name, session = %session_id, address, "listening");

        if self.address_sharing {
            // connect the joiner to every pre-existing listener, others first
            let others: Vec<SessionId> = state
                .listeners
                .get(address)
                .map(|listeners| {
                    listeners
                        .iter()
                        .copied()
                        .filter(|other| *other != session_id)
                        .collect()
                })
                .unwrap_or_default();
            for other_id in others {
                if let Some(other) = state.sessions.get_mut(&other_id) {
                    other.accept_incoming_connection(session_id);
                } else {
                    error!(pool = %self.name, listener = %other_id, "listener entry without session");
                    continue;
                }
                if let Some(session) = state.sessions.get_mut(&session_id) {
                    session.accept_incoming_connection(other_id);
                }
            }
        }
    }

    fn on_connection_request(
        &self,
        state: &mut PoolState,
        session_id: SessionId,
        address: &str,
        connection_id: ConnectionId,
    ) {
        let target = match state.listeners.get(address) {
            // a single foreign listener is the only connectable state; under
            // sharing the outgoing connect is undefined and denied
            Some(listeners) if listeners.len() == 1 && listeners[0] != session_id => {
                Some(listeners[0])
            }
            _ => None,
        };

        match target {
            Some(target_id) => {
                if let Some(target) = state.sessions.get_mut(&target_id) {
                    target.accept_incoming_connection(session_id);
                } else {
                    error!(pool = %self.name, listener = %target_id, "listener entry without session");
                    if let Some(session) = state.sessions.get(&session_id) {
                        session.deny_connection(address, connection_id);
                    }
                    return;
                }
                if let Some(session) = state.sessions.get_mut(&session_id) {
                    session.accept_outgoing_connection(target_id, connection_id);
                }
            }
            None => {
                if let Some(session) = state.sessions.get(&session_id) {
                    session.deny_connection(address, connection_id);
                }
            }
        }
    }

    /// Remove one pairing, notifying both clients. Resolves both directions
    /// before mutating so an asymmetric pair map is dropped, not guessed at.
    fn teardown_pairing(
        &self,
        state: &mut PoolState,
        session_id: SessionId,
        connection_id: ConnectionId,
    ) {
        let Some(other_id) = state
            .sessions
            .get(&session_id)
            .and_then(|session| session.connections.get(&connection_id).copied())
        else {
            debug!(
                pool = %self.name,
                session = %session_id,
                connection = connection_id,
                "disconnect for unknown connection id, dropped"
            );
            return;
        };
        let Some(remote_id) = state
            .sessions
            .get(&other_id)
            .and_then(|other| other.connection_id_for(session_id))
        else {
            error!(
                pool = %self.name,
                session = %session_id,
                other = %other_id,
                connection = connection_id,
                "pair map asymmetry, dropping disconnect"
            );
            return;
        };

        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.connections.remove(&connection_id);
            session.send_to_client(NetworkEvent::simple(NetEventType::Disconnected, connection_id));
        }
        if let Some(other) = state.sessions.get_mut(&other_id) {
            other.connections.remove(&remote_id);
            other.send_to_client(NetworkEvent::simple(NetEventType::Disconnected, remote_id));
        }
        debug!(
            pool = %self.name,
            session = %session_id,
            other = %other_id,
            "pairing removed"
        );
    }

    /// Forward a reliable or unreliable message to the paired session,
    /// translating the connection id into the receiver's local id.
    fn forward_message(&self, state: &mut PoolState, session_id: SessionId, event: NetworkEvent) {
        let Some(other_id) = state
            .sessions
            .get(&session_id)
            .and_then(|session| session.connections.get(&event.connection_id).copied())
        else {
            // the client may have sent this before processing a Disconnected
            debug!(
                pool = %self.name,
                session = %session_id,
                connection = event.connection_id,
                "message for unknown connection id, dropped"
            );
            return;
        };
        let Some(other) = state.sessions.get(&other_id) else {
            warn!(pool = %self.name, session = %session_id, other = %other_id, "pairing points at a missing session");
            return;
        };
        let Some(remote_id) = other.connection_id_for(session_id) else {
            error!(
                pool = %self.name,
                session = %session_id,
                other = %other_id,
                "pair map asymmetry, dropping message"
            );
            return;
        };
        other.send_to_client(NetworkEvent::new(event.event_type, remote_id, event.payload));
    }

    fn remove_listener(state: &mut PoolState, session_id: SessionId, address: &str) {
        if let Some(listeners) = state.listeners.get_mut(address) {
            listeners.retain(|listener| *listener != session_id);
            if listeners.is_empty() {
                state.listeners.remove(address);
            }
        }
    }
}
