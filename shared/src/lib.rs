//! Wire protocol shared by the relay server and its clients.
//!
//! Every frame is a JSON record `{"OP": <opcode>, "payload": <value>}`.
//! Inbound frames decode into [`ClientMessage`], outbound frames are built
//! from [`ServerMessage`]. Decoding keeps two failure modes apart: bytes
//! that are not a well-formed frame ([`DecodeError::Malformed`]) and
//! frames naming an opcode the server does not accept
//! ([`DecodeError::UnknownOp`]).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of operation codes understood by either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Register,
    RegisterAck,
    Error,
    Chat,
    EnterWorld,
    EnterWorldAck,
    NewPlayer,
    MoveTo,
    StopMoving,
    Ping,
    Pong,
}

impl Op {
    pub const ALL: [Op; 11] = [
        Op::Register,
        Op::RegisterAck,
        Op::Error,
        Op::Chat,
        Op::EnterWorld,
        Op::EnterWorldAck,
        Op::NewPlayer,
        Op::MoveTo,
        Op::StopMoving,
        Op::Ping,
        Op::Pong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Register => "REGISTER",
            Op::RegisterAck => "REGISTERACK",
            Op::Error => "ERROR",
            Op::Chat => "CHAT",
            Op::EnterWorld => "ENTER_WORLD",
            Op::EnterWorldAck => "ENTER_WORLD_ACK",
            Op::NewPlayer => "NEW_PLAYER",
            Op::MoveTo => "MOVE_TO",
            Op::StopMoving => "STOP_MOVING",
            Op::Ping => "PING",
            Op::Pong => "PONG",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Op::ALL.iter().copied().find(|op| op.as_str() == s).ok_or(())
    }
}

/// 2D coordinate reported by clients. The server never validates it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self::default()
    }
}

/// Client-chosen avatar identifier, carried through untouched.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct AvatarId(pub Value);

impl From<&str> for AvatarId {
    fn from(value: &str) -> Self {
        AvatarId(Value::String(value.to_string()))
    }
}

impl From<i64> for AvatarId {
    fn from(value: i64) -> Self {
        AvatarId(Value::from(value))
    }
}

/// Public view of a registered player, as sent in `ENTER_WORLD_ACK` and
/// `NEW_PLAYER`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub username: String,
    #[serde(rename = "avatarId")]
    pub avatar_id: AvatarId,
    pub position: Position,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Registration {
    pub username: String,
    #[serde(rename = "avatarId")]
    pub avatar_id: AvatarId,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatLine {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Movement {
    pub position: Position,
}

/// Operations a client may send to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "OP", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "REGISTER")]
    Register(Registration),
    #[serde(rename = "CHAT")]
    Chat(ChatLine),
    #[serde(rename = "ENTER_WORLD")]
    EnterWorld,
    #[serde(rename = "MOVE_TO")]
    MoveTo(Movement),
    #[serde(rename = "STOP_MOVING")]
    StopMoving(Value),
    #[serde(rename = "PING")]
    Ping,
}

impl ClientMessage {
    pub fn op(&self) -> Op {
        match self {
            ClientMessage::Register(_) => Op::Register,
            ClientMessage::Chat(_) => Op::Chat,
            ClientMessage::EnterWorld => Op::EnterWorld,
            ClientMessage::MoveTo(_) => Op::MoveTo,
            ClientMessage::StopMoving(_) => Op::StopMoving,
            ClientMessage::Ping => Op::Ping,
        }
    }
}

/// Operations the server sends to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "OP", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "REGISTERACK")]
    RegisterAck,
    #[serde(rename = "ERROR")]
    Error { error: String },
    #[serde(rename = "CHAT")]
    Chat { username: String, message: String },
    #[serde(rename = "ENTER_WORLD_ACK")]
    EnterWorldAck { players: Vec<PlayerSnapshot> },
    #[serde(rename = "NEW_PLAYER")]
    NewPlayer(PlayerSnapshot),
    #[serde(rename = "MOVE_TO")]
    MoveTo { username: String, position: Position },
    #[serde(rename = "STOP_MOVING")]
    StopMoving(Value),
    #[serde(rename = "PONG")]
    Pong,
}

impl ServerMessage {
    pub fn error(text: impl Into<String>) -> Self {
        ServerMessage::Error { error: text.into() }
    }

    pub fn op(&self) -> Op {
        match self {
            ServerMessage::RegisterAck => Op::RegisterAck,
            ServerMessage::Error { .. } => Op::Error,
            ServerMessage::Chat { .. } => Op::Chat,
            ServerMessage::EnterWorldAck { .. } => Op::EnterWorldAck,
            ServerMessage::NewPlayer(_) => Op::NewPlayer,
            ServerMessage::MoveTo { .. } => Op::MoveTo,
            ServerMessage::StopMoving(_) => Op::StopMoving,
            ServerMessage::Pong => Op::Pong,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Unknown OP received. Server does not understand: '{0}'")]
    UnknownOp(String),
}

/// Raw frame before the payload is interpreted.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "OP", default)]
    op: Option<Value>,
    #[serde(default)]
    payload: Value,
}

fn payload<T: DeserializeOwned>(op: Op, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload)
        .map_err(|e| DecodeError::Malformed(format!("invalid {} payload: {}", op, e)))
}

/// Decodes one inbound frame.
///
/// The opcode is resolved before the payload is looked at, so a frame
/// with an unknown opcode is reported as such even if its payload is junk.
/// Opcodes that only flow server-to-client count as unknown here.
pub fn decode(bytes: &[u8]) -> Result<ClientMessage, DecodeError> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let name = match envelope.op {
        Some(Value::String(name)) => name,
        Some(other) => return Err(DecodeError::UnknownOp(other.to_string())),
        None => return Err(DecodeError::Malformed("missing OP".to_string())),
    };

    let op = match name.parse::<Op>() {
        Ok(op) => op,
        Err(()) => return Err(DecodeError::UnknownOp(name)),
    };

    match op {
        Op::Register => Ok(ClientMessage::Register(payload(op, envelope.payload)?)),
        Op::Chat => Ok(ClientMessage::Chat(payload(op, envelope.payload)?)),
        Op::EnterWorld => Ok(ClientMessage::EnterWorld),
        Op::MoveTo => Ok(ClientMessage::MoveTo(payload(op, envelope.payload)?)),
        Op::StopMoving => Ok(ClientMessage::StopMoving(envelope.payload)),
        Op::Ping => Ok(ClientMessage::Ping),
        Op::RegisterAck
        | Op::Error
        | Op::EnterWorldAck
        | Op::NewPlayer
        | Op::Pong => Err(DecodeError::UnknownOp(name)),
    }
}

/// Encodes one outbound frame as JSON text.
pub fn encode(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
