//! # Relay Server Library
//!
//! This library provides the authoritative relay for a real-time multiplayer
//! session. Clients connect over WebSocket, register a username and avatar,
//! then exchange chat and movement events that the server fans out to every
//! other connected player. The server never simulates anything: positions
//! reported by clients are stored and relayed as-is.
//!
//! ## Core Responsibilities
//!
//! ### Player Registry
//! The registry is the one shared piece of state. It maps usernames to
//! players and guarantees a name is held by at most one connection. It is an
//! ordinary value constructed at startup and handed to connection tasks, so
//! tests can run any number of independent registries side by side.
//!
//! ### Connection Lifecycle
//! Every connection starts unregistered. Until it registers, everything but
//! `PING` and `REGISTER` is answered with an `ERROR`. Once registered, the
//! username is fixed for the life of the socket and is released when the
//! socket closes or can no longer be written to.
//!
//! ### Broadcasting
//! Gameplay operations from a registered player are relayed to all other
//! players. The sender never sees its own echo; the one unicast reply is the
//! `ENTER_WORLD_ACK` roster.
//!
//! ## Module Organization
//!
//! ### Client Module (`client`)
//! Outbound handle of a connection: an ordered queue drained by a writer
//! task, with sends that report a closed peer as an error.
//!
//! ### Registry Module (`registry`)
//! The player table, its locking, and consistent snapshots.
//!
//! ### Connection Module (`connection`)
//! The per-connection state machine: decoding, the registration gate, and
//! the close path.
//!
//! ### Router Module (`router`)
//! Fan-out rules for `CHAT`, `ENTER_WORLD`, `MOVE_TO` and `STOP_MOVING`.
//!
//! ### Network Module (`network`)
//! TCP listener, WebSocket handshake, and the reader/writer tasks that
//! connect a socket to a [`Connection`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         addr: "127.0.0.1:8080".to_string(),
//!         max_players: Some(64),
//!     };
//!
//!     let server = RelayServer::bind(&config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Nothing a client sends can take the server down. Malformed frames,
//! unknown opcodes and out-of-order operations are answered with a protocol
//! `ERROR` on the same connection. A peer that can no longer be written to
//! is dropped from the registry without disturbing deliveries to anyone
//! else.

pub mod client;
pub mod connection;
pub mod network;
pub mod registry;
pub mod router;

pub use client::{ClientHandle, ConnectionId, SendError};
pub use connection::{Connection, ConnectionState};
pub use network::{RelayServer, ServerConfig};
pub use registry::{Registry, RegistryError};
pub use router::Router;
