//! Fan-out of gameplay operations from a registered sender
//!
//! Every broadcast works on a [`Roster`] copied out of the registry, so a
//! player joining or leaving mid-broadcast never tears the iteration. Frames
//! are encoded once and queued to each recipient; a recipient whose queue is
//! gone is dropped from the registry and the broadcast carries on.

use crate::client::{ClientHandle, SendError};
use crate::registry::{Registry, RosterEntry};
use log::{debug, error, warn};
use serde_json::Value;
use shared::{encode, Position, ServerMessage};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Relays a chat line to everyone but the sender.
    pub async fn chat(&self, from: &str, message: String) -> usize {
        let recipients = self.registry.snapshot().await.others(from);
        let chat = ServerMessage::Chat {
            username: from.to_string(),
            message,
        };
        self.broadcast(&recipients, &chat).await
    }

    /// Answers the sender with the full roster and announces it to the rest.
    ///
    /// Both views come from one snapshot, so a player registering at the
    /// same moment is either in the ack and told about the sender, or in
    /// neither.
    pub async fn enter_world(&self, from: &str, reply: &ClientHandle) -> Result<usize, SendError> {
        let roster = self.registry.snapshot().await;

        // Evicted after a failed delivery, nothing left to enter with
        let Some(me) = roster.get(from).filter(|e| e.client.id() == reply.id()) else {
            return Err(SendError::Closed(reply.id()));
        };
        let announcement = ServerMessage::NewPlayer(me.player.clone());

        reply.send(&ServerMessage::EnterWorldAck {
            players: roster.players(),
        })?;

        Ok(self.broadcast(&roster.others(from), &announcement).await)
    }

    /// Stores the sender's reported position and relays it unchanged.
    pub async fn move_to(&self, from: &str, reply: &ClientHandle, position: Position) -> usize {
        if !self.registry.set_position(from, reply.id(), position).await {
            debug!("Ignoring MOVE_TO from '{}', no longer registered", from);
            return 0;
        }

        let recipients = self.registry.snapshot().await.others(from);
        let moved = ServerMessage::MoveTo {
            username: from.to_string(),
            position,
        };
        self.broadcast(&recipients, &moved).await
    }

    pub async fn stop_moving(&self, from: &str, payload: Value) -> usize {
        let recipients = self.registry.snapshot().await.others(from);
        self.broadcast(&recipients, &ServerMessage::StopMoving(payload))
            .await
    }

    /// Queues `message` to every recipient, returning how many accepted it.
    async fn broadcast(&self, recipients: &[RosterEntry], message: &ServerMessage) -> usize {
        if recipients.is_empty() {
            return 0;
        }

        let frame = match encode(message) {
            Ok(text) => Message::Text(text),
            Err(e) => {
                error!("Failed to encode {} broadcast: {}", message.op(), e);
                return 0;
            }
        };

        let mut delivered = 0;
        for recipient in recipients {
            match recipient.client.send_frame(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Delivery of {} to '{}' failed: {}",
                        message.op(),
                        recipient.player.username,
                        e
                    );
                    self.registry
                        .remove(&recipient.player.username, recipient.client.id())
                        .await;
                }
            }
        }

        debug!(
            "Broadcast {} to {}/{} players",
            message.op(),
            delivered,
            recipients.len()
        );
        delivered
    }
}
