//! Event model shared by client and server.
//!
//! A [`NetworkEvent`] is the unit of communication on the relay protocol:
//! an event type, a connection id naming a peer pairing from the sender's
//! local perspective, and an optional payload.

/// Identifies a peer pairing from one side's local perspective.
///
/// Ids in `[16384, 32767)` are assigned by the server for incoming
/// pairings; ids outside that range are chosen by the client for outgoing
/// connection attempts. `-1` denotes "no connection".
pub type ConnectionId = i16;

/// Sentinel id for server-lifecycle events that name no pairing
pub const INVALID_CONNECTION_ID: ConnectionId = -1;

/// First id handed out for incoming pairings
pub const FIRST_INCOMING_ID: ConnectionId = 16384;

/// Maximum address length in UTF-16 code units
pub const MAX_ADDRESS_LENGTH: usize = 256;

/// Event types carried on the wire. The discriminants are wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NetEventType {
    Invalid = 0,
    UnreliableMessageReceived = 1,
    ServerInitialized = 2,
    ServerInitFailed = 3,
    ServerClosed = 4,
    NewConnection = 5,
    ConnectionFailed = 6,
    Disconnected = 7,
    ReliableMessageReceived = 8,
    FatalError = 100,
    Warning = 101,
    Log = 102,
    MetaVersion = 103,
    MetaHeartbeat = 104,
}

impl NetEventType {
    /// Parse a wire byte, `None` for values outside the closed enumeration
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NetEventType::Invalid),
            1 => Some(NetEventType::UnreliableMessageReceived),
            2 => Some(NetEventType::ServerInitialized),
            3 => Some(NetEventType::ServerInitFailed),
            4 => Some(NetEventType::ServerClosed),
            5 => Some(NetEventType::NewConnection),
            6 => Some(NetEventType::ConnectionFailed),
            7 => Some(NetEventType::Disconnected),
            8 => Some(NetEventType::ReliableMessageReceived),
            100 => Some(NetEventType::FatalError),
            101 => Some(NetEventType::Warning),
            102 => Some(NetEventType::Log),
            103 => Some(NetEventType::MetaVersion),
            104 => Some(NetEventType::MetaHeartbeat),
            _ => None,
        }
    }
}

/// Event payload: absent, a string (UTF-16LE on the wire), or opaque bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// The payload text, if this is a string payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Payload::None)
    }
}

/// One relay protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    pub event_type: NetEventType,
    pub connection_id: ConnectionId,
    pub payload: Payload,
}

impl NetworkEvent {
    pub fn new(event_type: NetEventType, connection_id: ConnectionId, payload: Payload) -> Self {
        Self {
            event_type,
            connection_id,
            payload,
        }
    }

    /// Event without payload
    pub fn simple(event_type: NetEventType, connection_id: ConnectionId) -> Self {
        Self::new(event_type, connection_id, Payload::None)
    }

    /// Event with a string payload
    pub fn with_text(
        event_type: NetEventType,
        connection_id: ConnectionId,
        text: impl Into<String>,
    ) -> Self {
        Self::new(event_type, connection_id, Payload::Text(text.into()))
    }

    /// Event with an opaque byte payload
    pub fn with_data(event_type: NetEventType, connection_id: ConnectionId, data: Vec<u8>) -> Self {
        Self::new(event_type, connection_id, Payload::Binary(data))
    }
}
