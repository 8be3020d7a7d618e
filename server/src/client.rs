use shared::{encode, Op, ServerMessage};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub type ConnectionId = u64;

/// Failure to hand an outbound frame to a connection.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection's writer is gone, so the peer is unreachable.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("failed to encode {op} frame: {source}")]
    Encode {
        op: Op,
        #[source]
        source: serde_json::Error,
    },
}

/// Outbound side of one connection. Frames are queued here and written to
/// the socket by the connection's writer task, in enqueue order.
///
/// The queue is unbounded: a peer that stays connected but never reads
/// keeps accumulating frames until its socket closes.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Message>,
}

impl ClientHandle {
    pub fn new(id: ConnectionId, sender: mpsc::UnboundedSender<Message>) -> Self {
        ClientHandle { id, sender }
    }

    /// Handle plus the receiving end a writer task drains
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ClientHandle::new(id, sender), receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, message: &ServerMessage) -> Result<(), SendError> {
        let text = encode(message).map_err(|source| SendError::Encode {
            op: message.op(),
            source,
        })?;
        self.send_frame(Message::Text(text))
    }

    /// Queues an already encoded frame, used when one frame fans out to many
    pub fn send_frame(&self, frame: Message) -> Result<(), SendError> {
        self.sender
            .send(frame)
            .map_err(|_| SendError::Closed(self.id))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_send_queues_encoded_frame() {
        let (client, mut rx) = ClientHandle::channel(7);
        assert_ok!(client.send(&ServerMessage::Pong));

        match rx.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(text, r#"{"OP":"PONG"}"#),
            other => panic!("Unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_frames_keep_enqueue_order() {
        let (client, mut rx) = ClientHandle::channel(1);
        for i in 0..5 {
            assert_ok!(client.send_frame(Message::Text(i.to_string())));
        }

        for i in 0..5 {
            assert_eq!(rx.try_recv().unwrap(), Message::Text(i.to_string()));
        }
    }

    #[test]
    fn test_send_after_writer_dropped_fails() {
        let (client, rx) = ClientHandle::channel(3);
        assert!(!client.is_closed());
        drop(rx);

        assert!(client.is_closed());
        match assert_err!(client.send(&ServerMessage::RegisterAck)) {
            SendError::Closed(id) => assert_eq!(id, 3),
            other => panic!("Expected closed error, got {:?}", other),
        }
    }
}
