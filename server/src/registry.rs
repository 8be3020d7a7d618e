//! Registry of connected, registered players
//!
//! The registry is the single source of truth for who is online. It owns one
//! [`Player`] entry per username and is shared between connection tasks as
//! an `Arc<Registry>`. All access goes through one `RwLock`:
//! - uniqueness checks and inserts happen under the same write guard
//! - broadcasts copy a snapshot under the read guard and send outside it
//! - removal is keyed by username *and* connection id, so it is idempotent
//!   and a stale connection never evicts a newer owner of the name

use crate::client::{ClientHandle, ConnectionId};
use log::info;
use shared::{AvatarId, PlayerSnapshot, Position};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

/// A registered player and the outbound handle of its connection
#[derive(Debug)]
pub struct Player {
    pub username: String,
    pub avatar_id: AvatarId,
    /// Last position reported by the player itself
    pub position: Position,
    pub client: ClientHandle,
}

impl Player {
    pub fn new(username: String, avatar_id: AvatarId, client: ClientHandle) -> Self {
        Self {
            username,
            avatar_id,
            position: Position::origin(),
            client,
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            username: self.username.clone(),
            avatar_id: self.avatar_id.clone(),
            position: self.position,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("username: '{0}' is not available.")]
    UsernameTaken(String),
    #[error("Server is full, try again later.")]
    Full,
}

/// One player as seen at snapshot time
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub player: PlayerSnapshot,
    pub client: ClientHandle,
}

/// Consistent copy of the whole registry, taken under a single read guard
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn players(&self) -> Vec<PlayerSnapshot> {
        self.entries.iter().map(|e| e.player.clone()).collect()
    }

    pub fn get(&self, username: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.player.username == username)
    }

    /// Everyone except `username`
    pub fn others(&self, username: &str) -> Vec<RosterEntry> {
        self.entries
            .iter()
            .filter(|e| e.player.username != username)
            .cloned()
            .collect()
    }
}

pub struct Registry {
    /// Registered players keyed by username, iterated in sorted order
    players: RwLock<BTreeMap<String, Player>>,
    /// Maximum number of concurrent players, unlimited when `None`
    max_players: Option<usize>,
    next_connection_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_max_players(None)
    }

    pub fn with_max_players(max_players: Option<usize>) -> Self {
        Self {
            players: RwLock::new(BTreeMap::new()),
            max_players,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Hands out a fresh id for a newly accepted connection
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `username` for the connection behind `client`.
    ///
    /// The availability check and the insert happen under one write guard,
    /// so of several concurrent attempts on the same name exactly one wins.
    pub async fn register(
        &self,
        username: &str,
        avatar_id: AvatarId,
        client: ClientHandle,
    ) -> Result<PlayerSnapshot, RegistryError> {
        let mut players = self.players.write().await;

        if players.contains_key(username) {
            return Err(RegistryError::UsernameTaken(username.to_string()));
        }
        if let Some(max) = self.max_players {
            if players.len() >= max {
                return Err(RegistryError::Full);
            }
        }

        let connection = client.id();
        let player = Player::new(username.to_string(), avatar_id, client);
        let snapshot = player.snapshot();
        players.insert(username.to_string(), player);
        info!(
            "Player '{}' registered on connection {} ({} online)",
            username,
            connection,
            players.len()
        );

        Ok(snapshot)
    }

    /// Removes the entry for `username` if it still belongs to `connection`.
    ///
    /// Returns false when there was nothing to remove, which happens when
    /// the close path and a failed delivery both try to clean up.
    pub async fn remove(&self, username: &str, connection: ConnectionId) -> bool {
        let mut players = self.players.write().await;

        match players.get(username) {
            Some(player) if player.client.id() == connection => {
                players.remove(username);
                info!("Player '{}' removed ({} online)", username, players.len());
                true
            }
            _ => false,
        }
    }

    /// Stores a new position for `username`. Only the owning connection may
    /// move its player.
    pub async fn set_position(
        &self,
        username: &str,
        connection: ConnectionId,
        position: Position,
    ) -> bool {
        let mut players = self.players.write().await;

        match players.get_mut(username) {
            Some(player) if player.client.id() == connection => {
                player.position = position;
                true
            }
            _ => false,
        }
    }

    pub async fn snapshot(&self) -> Roster {
        let players = self.players.read().await;
        Roster {
            entries: players
                .values()
                .map(|p| RosterEntry {
                    player: p.snapshot(),
                    client: p.client.clone(),
                })
                .collect(),
        }
    }

    pub async fn player(&self, username: &str) -> Option<PlayerSnapshot> {
        self.players.read().await.get(username).map(Player::snapshot)
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.players.read().await.contains_key(username)
    }

    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.players.read().await.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
