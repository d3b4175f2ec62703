//! Test client speaking the relay's binary protocol over a real websocket.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use signal_relay::codec::{self, Frame};
use signal_relay::{ConnectionId, NetEventType, NetworkEvent, INVALID_CONNECTION_ID};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long a single expected event may take to arrive
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long we watch for events that must NOT arrive
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("decode error: {0}")]
    Decode(#[from] signal_relay::Error),

    #[error("timed out waiting for an event")]
    Timeout,

    #[error("connection closed with code {0:?}")]
    Closed(Option<u16>),
}

/// One relay client
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[allow(dead_code)] // each scenario uses its own slice of the client surface
impl TestClient {
    /// Connect to `ws://{addr}{path}`. The path may carry a query string.
    pub async fn connect(addr: SocketAddr, path: &str) -> HarnessResult<Self> {
        let url = format!("ws://{addr}{path}");
        let (ws, _response) = connect_async(url.as_str()).await?;
        Ok(Self { ws })
    }

    pub async fn send_event(&mut self, event: &NetworkEvent) -> HarnessResult<()> {
        self.ws
            .send(Message::Binary(codec::encode_event(event)))
            .await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, bytes: Vec<u8>) -> HarnessResult<()> {
        self.ws.send(Message::Binary(bytes)).await?;
        Ok(())
    }

    /// Request to listen on `address`
    pub async fn listen(&mut self, address: &str) -> HarnessResult<()> {
        self.send_event(&NetworkEvent::with_text(
            NetEventType::ServerInitialized,
            INVALID_CONNECTION_ID,
            address,
        ))
        .await
    }

    /// Stop listening on the current address
    pub async fn stop_listening(&mut self) -> HarnessResult<()> {
        self.send_event(&NetworkEvent::simple(
            NetEventType::ServerClosed,
            INVALID_CONNECTION_ID,
        ))
        .await
    }

    /// Request a connection to `address` under the client-chosen id
    pub async fn open_connection(&mut self, address: &str, id: ConnectionId) -> HarnessResult<()> {
        self.send_event(&NetworkEvent::with_text(
            NetEventType::NewConnection,
            id,
            address,
        ))
        .await
    }

    /// Tear down the pairing known locally as `id`
    pub async fn disconnect(&mut self, id: ConnectionId) -> HarnessResult<()> {
        self.send_event(&NetworkEvent::simple(NetEventType::Disconnected, id))
            .await
    }

    pub async fn send_reliable_text(&mut self, id: ConnectionId, text: &str) -> HarnessResult<()> {
        self.send_event(&NetworkEvent::with_text(
            NetEventType::ReliableMessageReceived,
            id,
            text,
        ))
        .await
    }

    /// Next decoded frame, transparently answering transport pings
    pub async fn recv_frame(&mut self) -> HarnessResult<Frame> {
        loop {
            let message = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| HarnessError::Timeout)?;
            match message {
                Some(Ok(Message::Binary(data))) => return Ok(codec::decode(&data)?),
                Some(Ok(Message::Ping(data))) => {
                    self.ws.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(HarnessError::Closed(
                        frame.map(|frame| u16::from(frame.code)),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(HarnessError::Closed(None)),
            }
        }
    }

    /// Next relay event, skipping meta frames
    pub async fn recv_event(&mut self) -> HarnessResult<NetworkEvent> {
        loop {
            if let Frame::Event(event) = self.recv_frame().await? {
                return Ok(event);
            }
        }
    }

    /// Next relay event, asserted to be of the given type
    pub async fn expect_event(&mut self, event_type: NetEventType) -> HarnessResult<NetworkEvent> {
        let event = self.recv_event().await?;
        assert_eq!(
            event.event_type, event_type,
            "expected {event_type:?}, got {event:?}"
        );
        Ok(event)
    }

    /// Assert that nothing arrives for a quiet period
    pub async fn expect_no_event(&mut self) {
        match tokio::time::timeout(QUIET_PERIOD, self.recv_event()).await {
            Err(_) => {}
            Ok(result) => panic!("expected silence, got {result:?}"),
        }
    }

    /// Read until the server closes the socket; returns the close code
    pub async fn expect_close(&mut self) -> Option<u16> {
        loop {
            match self.recv_frame().await {
                Err(HarnessError::Closed(code)) => return code,
                Err(HarnessError::WebSocket(_)) => return None,
                Err(other) => panic!("expected a close, got error {other:?}"),
                Ok(_) => {}
            }
        }
    }

    /// Drop the TCP stream without a websocket close handshake
    pub fn abort(self) {
        drop(self);
    }
}
