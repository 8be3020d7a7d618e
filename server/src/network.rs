//! Server network layer accepting WebSocket connections

use crate::client::ClientHandle;
use crate::connection::Connection;
use crate::registry::Registry;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

/// Listener settings for [`RelayServer`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `127.0.0.1:8080`
    pub addr: String,
    /// Maximum number of registered players, unlimited when `None`
    pub max_players: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            max_players: None,
        }
    }
}

/// Accepts connections and runs one task per connection
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl RelayServer {
    pub async fn bind(config: &ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(RelayServer {
            listener,
            registry: Arc::new(Registry::with_max_players(config.max_players)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept loop. Per-connection failures are logged and never end it.
    pub async fn run(self) -> io::Result<()> {
        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, registry).await {
                            warn!("Connection from {} ended with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Completes the WebSocket handshake on a freshly accepted TCP stream and
/// serves it until it closes.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
) -> Result<(), tungstenite::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    info!("Client connected from {}", peer);
    serve(ws, peer, registry).await;
    Ok(())
}

/// Drives one upgraded connection: a writer task drains the outbound queue
/// while inbound frames are fed to the connection state machine in order.
pub async fn serve<S>(ws: WebSocketStream<S>, peer: SocketAddr, registry: Arc<Registry>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    // No per-connection backlog limit: a peer that stops reading only
    // frees its queue once the socket errors or closes
    let (client, mut outbound) = ClientHandle::channel(registry.next_connection_id());
    let id = client.id();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = sink.send(frame).await {
                debug!("Write to connection {} failed: {}", id, e);
                return;
            }
        }
        let _ = sink.close().await;
    });

    let mut connection = Connection::new(client, registry);
    let mut writer_done = false;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let bytes = match frame {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Read from {} failed: {}", peer, e);
                        break;
                    }
                };

                if let Err(e) = connection.handle_frame(&bytes).await {
                    warn!("Dropping connection {} from {}: {}", id, peer, e);
                    break;
                }
            }
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    connection.close().await;

    // Lets the writer flush what is queued and shut the socket down
    if !writer_done {
        let _ = writer.await;
    }
}
