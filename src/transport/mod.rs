//! Websocket transport: framing, liveness and disposal for one connection

mod socket;

pub use socket::{SignalingSocket, CLOSE_GRACE_PERIOD, HEARTBEAT_INTERVAL};
