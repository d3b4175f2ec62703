//! Listener front-end.
//!
//! Accepts sockets on the configured plain and TLS endpoints, routes each
//! upgrade request by its path to the owning pool, applies the token
//! admission check, and wires an admitted socket to a freshly registered
//! peer session.

pub mod admission;

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::{Config, HttpsConfig};
use crate::error::{Error, Result};
use crate::peer::pool::PeerPool;
use crate::server::admission::TokenStore;
use crate::transport::SignalingSocket;

/// The relay server before its listeners are bound
pub struct RelayServer {
    config: Config,
    pools: HashMap<String, Arc<PeerPool>>,
    tokens: Arc<TokenStore>,
}

/// Running server: bound addresses plus the shutdown switch
pub struct RelayHandle {
    /// Address of the plain listener, if configured
    pub http_addr: Option<SocketAddr>,
    /// Address of the TLS listener, if configured
    pub https_addr: Option<SocketAddr>,
    pools: HashMap<String, Arc<PeerPool>>,
    tokens: Arc<TokenStore>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// State shared by every accept loop and connection task
struct Shared {
    pools: HashMap<String, Arc<PeerPool>>,
    tokens: Arc<TokenStore>,
    max_payload: usize,
}

impl RelayServer {
    /// Validate the configuration and build one pool per app entry
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pools = config
            .apps
            .iter()
            .map(|app| {
                info!(
                    app = %app.name,
                    path = %app.path,
                    address_sharing = app.address_sharing,
                    "pool configured"
                );
                (
                    app.path.clone(),
                    Arc::new(PeerPool::new(&app.name, app.address_sharing)),
                )
            })
            .collect();
        let tokens = Arc::new(TokenStore::new(config.admin_token.clone()));
        Ok(Self {
            config,
            pools,
            tokens,
        })
    }

    /// Bind the configured listeners and start accepting sockets.
    ///
    /// Returns once every listener is bound; bind and TLS setup failures
    /// surface here.
    pub async fn start(self) -> Result<RelayHandle> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            pools: self.pools.clone(),
            tokens: Arc::clone(&self.tokens),
            max_payload: self.config.max_payload,
        });

        let mut tasks = Vec::new();
        let mut http_addr = None;
        let mut https_addr = None;

        if let Some(http) = &self.config.http_config {
            let listener = TcpListener::bind((http.host.as_str(), http.port)).await?;
            let addr = listener.local_addr()?;
            info!(%addr, "ws listener bound");
            http_addr = Some(addr);
            tasks.push(tokio::spawn(accept_loop(
                listener,
                None,
                Arc::clone(&shared),
                shutdown_tx.subscribe(),
            )));
        }

        if let Some(https) = &self.config.https_config {
            let acceptor = build_tls_acceptor(https)?;
            let listener = TcpListener::bind((https.host.as_str(), https.port)).await?;
            let addr = listener.local_addr()?;
            info!(%addr, "wss listener bound");
            https_addr = Some(addr);
            tasks.push(tokio::spawn(accept_loop(
                listener,
                Some(acceptor),
                Arc::clone(&shared),
                shutdown_tx.subscribe(),
            )));
        }

        Ok(RelayHandle {
            http_addr,
            https_addr,
            pools: self.pools,
            tokens: self.tokens,
            shutdown_tx,
            tasks,
        })
    }

    /// Pool registered at `path`
    pub fn pool(&self, path: &str) -> Option<&Arc<PeerPool>> {
        self.pools.get(path)
    }

    /// Admission store consumed by the external admin surface
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }
}

impl RelayHandle {
    /// First bound address, preferring the plain listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.http_addr.or(self.https_addr)
    }

    /// Pool registered at `path`
    pub fn pool(&self, path: &str) -> Option<&Arc<PeerPool>> {
        self.pools.get(path)
    }

    /// Admission store consumed by the external admin surface
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Stop accepting sockets and wind the listeners down
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            let _ = task.await;
        }
        info!("listeners stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let shared = Arc::clone(&shared);
                        let tls = tls.clone();
                        tokio::spawn(async move {
                            match tls {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        handle_socket(tls_stream, peer_addr, shared).await;
                                    }
                                    Err(e) => {
                                        warn!(%peer_addr, error = %e, "TLS handshake failed");
                                    }
                                },
                                None => handle_socket(stream, peer_addr, shared).await,
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("listener shutting down");
                break;
            }
        }
    }
}

/// Upgrade one socket, admit it, and hand it to a new peer session
async fn handle_socket<S>(stream: S, peer_addr: SocketAddr, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(shared.max_payload);
    ws_config.max_frame_size = Some(shared.max_payload);

    let mut route: Option<Arc<PeerPool>> = None;
    let mut user_token: Option<String> = None;
    let accepted = {
        let callback = |request: &Request, response: Response| {
            let path = request.uri().path();
            user_token = query_param(request.uri().query(), "userToken");
            match shared.pools.get(path) {
                Some(pool) => {
                    route = Some(Arc::clone(pool));
                    Ok(response)
                }
                None => {
                    warn!(%peer_addr, path, "upgrade rejected, no application at path");
                    let mut rejection =
                        ErrorResponse::new(Some("no application at this path".to_string()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            }
        };
        accept_hdr_async_with_config(stream, callback, Some(ws_config)).await
    };

    let mut ws = match accepted {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer_addr, error = %e, "websocket handshake failed");
            return;
        }
    };
    let Some(pool) = route else {
        // the callback only succeeds after selecting a pool
        error!(%peer_addr, "handshake succeeded without a route");
        return;
    };

    if !shared.tokens.is_admitted(user_token.as_deref()).await {
        warn!(%peer_addr, "invalid user token, closing");
        let _ = ws
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "Invalid token".into(),
            })))
            .await;
        return;
    }

    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let session_id = pool.register_session(client_tx).await;
    debug!(%peer_addr, session = %session_id, pool = %pool.name(), "websocket established");
    SignalingSocket::new(ws, pool, session_id, client_rx, peer_addr)
        .run()
        .await;
}

fn build_tls_acceptor(config: &HttpsConfig) -> Result<TlsAcceptor> {
    let cert_file = File::open(&config.ssl_cert_file)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no certificates in {}",
            config.ssl_cert_file.display()
        )));
    }

    let key_file = File::open(&config.ssl_key_file)?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))?.ok_or_else(|| {
        Error::Tls(format!(
            "no private key in {}",
            config.ssl_key_file.display()
        ))
    })?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    for pair in query?.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(name) {
            return Some(parts.next().unwrap_or_default().to_string());
        }
    }
    None
}
