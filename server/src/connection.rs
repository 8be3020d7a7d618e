//! Per-connection lifecycle
//!
//! A [`Connection`] wraps the outbound handle of one transport connection
//! and tracks whether it has registered. Frames are handled strictly in
//! arrival order. Any error returned from [`Connection::handle_frame`] means
//! the connection can no longer be written to; the caller stops reading and
//! calls [`Connection::close`].

use crate::client::{ClientHandle, ConnectionId, SendError};
use crate::registry::Registry;
use crate::router::Router;
use log::{debug, info, warn};
use shared::{decode, ClientMessage, DecodeError, Registration, ServerMessage};
use std::sync::Arc;

pub const NOT_REGISTERED: &str = "You are not registered yet. Register with OP:REGISTER first.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unregistered,
    Registered { username: String },
}

pub struct Connection {
    client: ClientHandle,
    state: ConnectionState,
    registry: Arc<Registry>,
    router: Router,
}

impl Connection {
    pub fn new(client: ClientHandle, registry: Arc<Registry>) -> Self {
        Self {
            client,
            state: ConnectionState::Unregistered,
            router: Router::new(Arc::clone(&registry)),
            registry,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.client.id()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn username(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Registered { username } => Some(username),
            ConnectionState::Unregistered => None,
        }
    }

    /// Decodes and handles one inbound frame.
    pub async fn handle_frame(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        // Writer gone, possibly already evicted by a failed broadcast
        if self.client.is_closed() {
            return Err(SendError::Closed(self.id()));
        }

        match decode(bytes) {
            Ok(message) => self.handle_message(message).await,
            Err(DecodeError::UnknownOp(_)) if self.username().is_none() => {
                self.reply(&ServerMessage::error(NOT_REGISTERED))
            }
            Err(e @ DecodeError::UnknownOp(_)) => {
                warn!("Connection {}: {}", self.id(), e);
                self.reply(&ServerMessage::error(e.to_string()))
            }
            Err(e @ DecodeError::Malformed(_)) => {
                warn!("Connection {}: {}", self.id(), e);
                self.reply(&ServerMessage::error(e.to_string()))
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) -> Result<(), SendError> {
        debug!("Connection {} received {}", self.id(), message.op());

        // Health checks work before login
        if let ClientMessage::Ping = message {
            return self.reply(&ServerMessage::Pong);
        }

        let username = self.username().map(str::to_owned);
        let Some(username) = username else {
            return match message {
                ClientMessage::Register(registration) => self.register(registration).await,
                _ => self.reply(&ServerMessage::error(NOT_REGISTERED)),
            };
        };

        match message {
            ClientMessage::Register(_) => self.reply(&ServerMessage::error(format!(
                "You are already registered as: '{}'",
                username
            ))),
            ClientMessage::Chat(line) => {
                self.router.chat(&username, line.message).await;
                Ok(())
            }
            ClientMessage::EnterWorld => {
                self.router.enter_world(&username, &self.client).await?;
                Ok(())
            }
            ClientMessage::MoveTo(movement) => {
                self.router
                    .move_to(&username, &self.client, movement.position)
                    .await;
                Ok(())
            }
            ClientMessage::StopMoving(payload) => {
                self.router.stop_moving(&username, payload).await;
                Ok(())
            }
            ClientMessage::Ping => self.reply(&ServerMessage::Pong),
        }
    }

    async fn register(&mut self, registration: Registration) -> Result<(), SendError> {
        let Registration {
            username,
            avatar_id,
        } = registration;

        match self
            .registry
            .register(&username, avatar_id, self.client.clone())
            .await
        {
            Ok(_) => {
                self.state = ConnectionState::Registered { username };
                self.reply(&ServerMessage::RegisterAck)
            }
            Err(e) => {
                info!("Connection {} registration refused: {}", self.id(), e);
                self.reply(&ServerMessage::error(e.to_string()))
            }
        }
    }

    fn reply(&self, message: &ServerMessage) -> Result<(), SendError> {
        self.client.send(message)
    }

    /// Terminal transition, from either state.
    pub async fn close(self) {
        match &self.state {
            ConnectionState::Registered { username } => {
                self.registry.remove(username, self.client.id()).await;
                info!("Client username:'{}' has disconnected.", username);
            }
            ConnectionState::Unregistered => {
                info!("Unregistered connection {} has disconnected.", self.id());
            }
        }
    }
}
