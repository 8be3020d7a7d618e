//! Integration tests for the relay server
//!
//! These tests run a real server on a loopback port and talk to it over
//! WebSocket, the way browser clients do.

use assert_approx_eq::assert_approx_eq;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use server::network::{RelayServer, ServerConfig};
use server::Registry;
use shared::{AvatarId, Position, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestClient {
    sink: SplitSink<Ws, Message>,
    stream: SplitStream<Ws>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{}", addr))
            .await
            .expect("Failed to connect");
        let (sink, stream) = ws.split();
        Self { sink, stream }
    }

    async fn send(&mut self, frame: Value) {
        assert_ok!(self.sink.send(Message::Text(frame.to_string())).await);
    }

    async fn send_raw(&mut self, text: &str) {
        assert_ok!(self.sink.send(Message::Text(text.to_string())).await);
    }

    async fn recv(&mut self) -> ServerMessage {
        loop {
            let frame = timeout(Duration::from_secs(2), self.stream.next())
                .await
                .expect("Timed out waiting for frame")
                .expect("Stream ended")
                .expect("Read error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("Server sent an invalid frame");
            }
        }
    }

    /// Asserts nothing arrives within a short window
    async fn expect_silence(&mut self) {
        match timeout(Duration::from_millis(150), self.stream.next()).await {
            Err(_) => {}
            Ok(frame) => panic!("Expected silence, got {:?}", frame),
        }
    }

    async fn register(&mut self, username: &str, avatar: i64) {
        self.send(json!({
            "OP": "REGISTER",
            "payload": { "username": username, "avatarId": avatar }
        }))
        .await;
        assert_eq!(self.recv().await, ServerMessage::RegisterAck);
    }

    async fn close(mut self) {
        self.sink.close().await.unwrap();
    }
}

async fn start_server() -> (SocketAddr, Arc<Registry>) {
    let config = ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        max_players: None,
    };
    let server = RelayServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    tokio::spawn(server.run());
    (addr, registry)
}

async fn wait_until_gone(registry: &Registry, username: &str) {
    for _ in 0..100 {
        if !registry.contains(username).await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("'{}' was never removed from the registry", username);
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn ping_before_and_after_register() {
        let (addr, _) = start_server().await;
        let mut client = TestClient::connect(addr).await;

        client.send(json!({ "OP": "PING" })).await;
        assert_eq!(client.recv().await, ServerMessage::Pong);

        client.register("alice", 1).await;

        client.send(json!({ "OP": "PING", "payload": {} })).await;
        assert_eq!(client.recv().await, ServerMessage::Pong);
        client.expect_silence().await;
    }

    #[tokio::test]
    async fn duplicate_usernames_rejected() {
        let (addr, registry) = start_server().await;
        let mut first = TestClient::connect(addr).await;
        let mut second = TestClient::connect(addr).await;

        first.register("alice", 1).await;
        second
            .send(json!({
                "OP": "REGISTER",
                "payload": { "username": "alice", "avatarId": 2 }
            }))
            .await;

        assert_eq!(
            second.recv().await,
            ServerMessage::error("username: 'alice' is not available.")
        );
        assert_eq!(registry.len().await, 1);

        // Still unregistered, so gameplay is refused
        second
            .send(json!({ "OP": "CHAT", "payload": { "message": "hi" } }))
            .await;
        assert_eq!(
            second.recv().await,
            ServerMessage::error("You are not registered yet. Register with OP:REGISTER first.")
        );
        first.expect_silence().await;
    }

    #[tokio::test]
    async fn concurrent_registration_has_one_winner() {
        let (addr, registry) = start_server().await;

        let mut clients = Vec::new();
        for _ in 0..8 {
            clients.push(TestClient::connect(addr).await);
        }
        for client in clients.iter_mut() {
            client
                .send(json!({
                    "OP": "REGISTER",
                    "payload": { "username": "contested", "avatarId": 0 }
                }))
                .await;
        }

        let mut acks = 0;
        for client in clients.iter_mut() {
            match client.recv().await {
                ServerMessage::RegisterAck => acks += 1,
                ServerMessage::Error { error } => assert!(error.contains("contested")),
                other => panic!("Unexpected reply: {:?}", other),
            }
        }

        assert_eq!(acks, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn malformed_frames_keep_connection_open() {
        let (addr, _) = start_server().await;
        let mut client = TestClient::connect(addr).await;

        client.send_raw("this is not json").await;
        match client.recv().await {
            ServerMessage::Error { error } => assert!(error.starts_with("Malformed message:")),
            other => panic!("Unexpected reply: {:?}", other),
        }

        client.register("alice", 1).await;

        client
            .send(json!({ "OP": "MOVE_TO", "payload": { "where": "north" } }))
            .await;
        match client.recv().await {
            ServerMessage::Error { error } => assert!(error.starts_with("Malformed message:")),
            other => panic!("Unexpected reply: {:?}", other),
        }

        client.send(json!({ "OP": "TELEPORT", "payload": {} })).await;
        assert_eq!(
            client.recv().await,
            ServerMessage::error("Unknown OP received. Server does not understand: 'TELEPORT'")
        );

        client.send(json!({ "OP": "PING" })).await;
        assert_eq!(client.recv().await, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn close_frees_username() {
        let (addr, registry) = start_server().await;
        let mut watcher = TestClient::connect(addr).await;
        watcher.register("watcher", 0).await;

        let mut leaving = TestClient::connect(addr).await;
        leaving.register("alice", 1).await;
        leaving.close().await;
        wait_until_gone(&registry, "alice").await;

        let mut returning = TestClient::connect(addr).await;
        returning.register("alice", 2).await;

        watcher
            .send(json!({ "OP": "CHAT", "payload": { "message": "welcome back" } }))
            .await;
        assert_eq!(
            returning.recv().await,
            ServerMessage::Chat {
                username: "watcher".to_string(),
                message: "welcome back".to_string(),
            }
        );
        assert_eq!(
            registry.player("alice").await.unwrap().avatar_id,
            AvatarId::from(2)
        );
    }

    #[tokio::test]
    async fn capacity_limit_rejects_extra_players() {
        let config = ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            max_players: Some(1),
        };
        let server = RelayServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut first = TestClient::connect(addr).await;
        first.register("alice", 1).await;

        let mut second = TestClient::connect(addr).await;
        second
            .send(json!({ "OP": "REGISTER", "payload": { "username": "bob", "avatarId": 1 } }))
            .await;
        assert_eq!(
            second.recv().await,
            ServerMessage::error("Server is full, try again later.")
        );
    }
}

/// BROADCAST TESTS
mod broadcast_tests {
    use super::*;

    #[tokio::test]
    async fn chat_reaches_everyone_but_sender() {
        let (addr, _) = start_server().await;
        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        let mut c = TestClient::connect(addr).await;
        a.register("A", 1).await;
        b.register("B", 2).await;
        c.register("C", 3).await;

        a.send(json!({ "OP": "CHAT", "payload": { "message": "hi" } }))
            .await;

        let expected = ServerMessage::Chat {
            username: "A".to_string(),
            message: "hi".to_string(),
        };
        assert_eq!(b.recv().await, expected);
        assert_eq!(c.recv().await, expected);
        a.expect_silence().await;
    }

    #[tokio::test]
    async fn late_joiner_sees_everyone() {
        let (addr, _) = start_server().await;

        let mut existing = Vec::new();
        for i in 0..3 {
            let mut client = TestClient::connect(addr).await;
            client.register(&format!("p{}", i), i).await;
            existing.push(client);
        }

        let mut joiner = TestClient::connect(addr).await;
        joiner.register("joiner", 99).await;
        joiner.send(json!({ "OP": "ENTER_WORLD" })).await;

        match joiner.recv().await {
            ServerMessage::EnterWorldAck { players } => {
                assert_eq!(players.len(), 4);
                let names: Vec<_> = players.iter().map(|p| p.username.as_str()).collect();
                assert_eq!(names, vec!["joiner", "p0", "p1", "p2"]);
                assert!(players.iter().all(|p| p.position == Position::origin()));
                assert_eq!(players[0].avatar_id, AvatarId::from(99));
            }
            other => panic!("Unexpected reply: {:?}", other),
        }
        joiner.expect_silence().await;

        for client in existing.iter_mut() {
            match client.recv().await {
                ServerMessage::NewPlayer(player) => {
                    assert_eq!(player.username, "joiner");
                    assert_eq!(player.avatar_id, AvatarId::from(99));
                }
                other => panic!("Unexpected broadcast: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn movement_keeps_large_coordinates_exact() {
        let (addr, registry) = start_server().await;
        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A", 1).await;
        b.register("B", 2).await;

        a.send_raw(r#"{"OP":"MOVE_TO","payload":{"position":{"x":123456789.123,"y":-0.1}}}"#)
            .await;
        let expected = Position::new(123456789.123, -0.1);
        assert_eq!(
            b.recv().await,
            ServerMessage::MoveTo {
                username: "A".to_string(),
                position: expected,
            }
        );
        assert_eq!(registry.player("A").await.unwrap().position, expected);
    }

    #[tokio::test]
    async fn movement_is_stored_and_relayed() {
        let (addr, registry) = start_server().await;
        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A", 1).await;
        b.register("B", 2).await;

        a.send(json!({ "OP": "MOVE_TO", "payload": { "position": { "x": 40.5, "y": -3 } } }))
            .await;
        assert_eq!(
            b.recv().await,
            ServerMessage::MoveTo {
                username: "A".to_string(),
                position: Position::new(40.5, -3.0),
            }
        );
        a.expect_silence().await;
        assert_eq!(
            registry.player("A").await.unwrap().position,
            Position::new(40.5, -3.0)
        );

        b.send(json!({ "OP": "ENTER_WORLD" })).await;
        match b.recv().await {
            ServerMessage::EnterWorldAck { players } => {
                let a_view = players.iter().find(|p| p.username == "A").unwrap();
                assert_approx_eq!(a_view.position.x, 40.5, 1e-6);
                assert_approx_eq!(a_view.position.y, -3.0, 1e-6);
            }
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_moving_is_relayed_verbatim() {
        let (addr, _) = start_server().await;
        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A", 1).await;
        b.register("B", 2).await;

        let payload = json!({ "username": "A", "facing": "west", "frame": 4 });
        a.send(json!({ "OP": "STOP_MOVING", "payload": payload.clone() }))
            .await;

        assert_eq!(b.recv().await, ServerMessage::StopMoving(payload));
        a.expect_silence().await;
    }

    #[tokio::test]
    async fn closed_player_receives_nothing() {
        let (addr, registry) = start_server().await;
        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        let mut c = TestClient::connect(addr).await;
        a.register("A", 1).await;
        b.register("B", 2).await;
        c.register("C", 3).await;

        b.close().await;
        wait_until_gone(&registry, "B").await;

        a.send(json!({ "OP": "CHAT", "payload": { "message": "anyone?" } }))
            .await;
        assert_eq!(
            c.recv().await,
            ServerMessage::Chat {
                username: "A".to_string(),
                message: "anyone?".to_string(),
            }
        );
        let names: Vec<_> = registry
            .snapshot()
            .await
            .players()
            .into_iter()
            .map(|p| p.username)
            .collect();
        assert_eq!(names, vec!["A", "C"]);
    }
}
