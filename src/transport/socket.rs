//! Per-connection protocol session.
//!
//! A [`SignalingSocket`] owns exactly one websocket and hides all framing
//! and liveness concerns from the peer layer: it decodes inbound frames,
//! answers the version handshake and application heartbeats locally, runs
//! the transport-level ping/pong liveness check, and drains the session's
//! outbound queue onto the socket. Every failure mode — transport error,
//! remote close, no-pong timeout, malformed frame — funnels through the
//! same single-shot cleanup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};

use crate::peer::pool::PeerPool;
use crate::peer::session::SessionId;
use crate::protocol::codec::{self, Frame};
use crate::protocol::event::NetworkEvent;
use crate::protocol::{MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};

/// Liveness check period. A connection that produced no pong for a whole
/// period is declared dead.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a disposed connection may take to finish the close handshake
/// before the socket is dropped outright
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// One client connection bound to its peer session
pub struct SignalingSocket<S> {
    ws: WebSocketStream<S>,
    pool: Arc<PeerPool>,
    session_id: SessionId,
    client_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    peer_addr: SocketAddr,
}

impl<S> SignalingSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        ws: WebSocketStream<S>,
        pool: Arc<PeerPool>,
        session_id: SessionId,
        client_rx: mpsc::UnboundedReceiver<NetworkEvent>,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            ws,
            pool,
            session_id,
            client_rx,
            peer_addr,
        }
    }

    /// Drive the connection until it dies, then clean up the session and
    /// dispose of the socket.
    pub async fn run(mut self) {
        let session_id = self.session_id;
        let (mut sink, mut stream) = self.ws.split();

        let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // starts true so the immediate first tick only sends the first ping
        let mut pong_received = true;
        let mut remote_version: Option<u8> = None;

        loop {
            tokio::select! {
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Binary(data))) => match codec::decode(&data) {
                            Ok(Frame::Heartbeat) => {
                                if sink.send(Message::Binary(codec::encode_heartbeat())).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Frame::Version(version)) => {
                                if version < MIN_PROTOCOL_VERSION {
                                    warn!(session = %session_id, version, "remote protocol version below minimum");
                                }
                                remote_version = Some(version);
                                debug!(session = %session_id, version, "protocol version received");
                                if sink.send(Message::Binary(codec::encode_version(PROTOCOL_VERSION))).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Frame::Event(event)) => {
                                self.pool.handle_client_event(session_id, event).await;
                            }
                            Err(e) => {
                                error!(session = %session_id, error = %e, "closing session");
                                break;
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Pong(_))) => pong_received = true,
                        Some(Ok(Message::Close(_))) => {
                            debug!(session = %session_id, "remote closed the connection");
                            break;
                        }
                        Some(Ok(Message::Text(_))) => {
                            error!(session = %session_id, "text frame on a binary protocol, closing session");
                            break;
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            debug!(session = %session_id, error = %e, "websocket error");
                            break;
                        }
                        None => break,
                    }
                }
                outbound = self.client_rx.recv() => {
                    match outbound {
                        Some(event) => {
                            if sink.send(Message::Binary(codec::encode_event(&event))).await.is_err() {
                                warn!(session = %session_id, "send on a closed socket dropped");
                                break;
                            }
                        }
                        // the pool dropped the session: dispose the socket
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if !pong_received {
                        warn!(session = %session_id, peer = %self.peer_addr, "no pong since last heartbeat, closing session");
                        break;
                    }
                    pong_received = false;
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(version) = remote_version {
            debug!(session = %session_id, version, "disposing connection");
        }

        self.pool.cleanup_session(session_id).await;

        // cleanup may have queued final notifications; flush them before the
        // close frame so the client sees its Disconnected events
        while let Ok(event) = self.client_rx.try_recv() {
            if sink
                .send(Message::Binary(codec::encode_event(&event)))
                .await
                .is_err()
            {
                break;
            }
        }

        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        let _ = sink.send(close).await;

        // bounded wait for the close handshake, then drop the socket
        let _ = time::timeout(CLOSE_GRACE_PERIOD, async {
            while let Some(message) = stream.next().await {
                if matches!(message, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
        })
        .await;

        debug!(session = %session_id, peer = %self.peer_addr, "socket disposed");
    }
}
