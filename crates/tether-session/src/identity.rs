//! Identity directory: who users and players are.
//!
//! Tether doesn't own accounts. Credential checks and player lookup are
//! delegated to an [`IdentityDirectory`], implemented by whatever stores
//! your accounts (a database, an auth service, a fixture file).
//!
//! [`InMemoryDirectory`] is a ready-made implementation for development
//! and tests.
//!
//! # Example
//!
//! ```rust
//! use tether_session::{IdentityDirectory, InMemoryDirectory};
//! use tether_protocol::PlayerId;
//!
//! let mut directory = InMemoryDirectory::new();
//! let user = directory.add_user("ayla", "hunter2");
//! directory.add_player(user, "Ayla", "the docks");
//!
//! let record = directory.validate_user("ayla", "hunter2").unwrap();
//! assert_eq!(record.player_ids, vec![PlayerId::new("ayla")]);
//! assert!(directory.validate_user("ayla", "wrong").is_err());
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use tether_protocol::{PlayerId, UserId};

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    /// Lowercase login name.
    pub user_name: String,
    /// Players owned by this account, in creation order.
    pub player_ids: Vec<PlayerId>,
}

/// A player (character) owned by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub user_id: UserId,
    /// Display name, as typed at creation.
    pub name: String,
    /// Where the player is, shown in the roster.
    pub location: String,
}

/// Why a login attempt was refused.
///
/// The `Display` text is shown to the user verbatim in a `login_failure`
/// notice, so it must not leak which half of the credentials was wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid user name or password")]
    InvalidCredential,

    /// The directory itself failed (backend down, timeout).
    #[error("Login is unavailable: {0}")]
    Unavailable(String),
}

/// Source of truth for user and player identities.
///
/// # Trait bounds
///
/// - `Send + Sync` → the directory is shared with the server runtime and
///   called from whichever task holds the registry lock.
/// - `'static` → it lives as long as the registry.
///
/// Calls are synchronous and happen while the registry lock is held, so
/// implementations backed by slow I/O should answer from a cache.
pub trait IdentityDirectory: Send + Sync + 'static {
    /// Checks credentials and returns the account.
    ///
    /// `user_name` is already lowercased. Implementations may also accept
    /// a player name here and return the owning account; the registry
    /// then starts that player directly.
    fn validate_user(&self, user_name: &str, credential: &str) -> Result<UserRecord, IdentityError>;

    /// Looks up a player by id.
    fn find_player(&self, player_id: &PlayerId) -> Option<PlayerRecord>;

    /// Called when a player enters play on a fresh login (not when a
    /// binding moves between sessions).
    fn login_player(&self, _player: &PlayerRecord) {}

    /// Called when a player leaves play.
    fn logout_player(&self, _player: &PlayerRecord) {}
}

// ---------------------------------------------------------------------------
// InMemoryDirectory
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredUser {
    record: UserRecord,
    credential: String,
}

/// A directory held entirely in memory.
///
/// Credentials are compared as plain strings: this is a development and
/// test fixture, not an account store.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: HashMap<String, StoredUser>,
    players: HashMap<PlayerId, PlayerRecord>,
    next_user_id: u64,
    online: Mutex<BTreeSet<PlayerId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account. The name is stored lowercase.
    pub fn add_user(&mut self, user_name: &str, credential: &str) -> UserId {
        self.next_user_id += 1;
        let id = UserId(self.next_user_id);
        let user_name = user_name.to_lowercase();
        self.users.insert(
            user_name.clone(),
            StoredUser {
                record: UserRecord {
                    id,
                    user_name,
                    player_ids: Vec::new(),
                },
                credential: credential.to_string(),
            },
        );
        id
    }

    /// Adds a player to an existing account.
    ///
    /// A player for an unknown account is still stored, but no account
    /// lists it.
    pub fn add_player(&mut self, user_id: UserId, name: &str, location: &str) -> PlayerId {
        let id = PlayerId::new(name);
        if let Some(user) = self.users.values_mut().find(|u| u.record.id == user_id) {
            user.record.player_ids.push(id.clone());
        }
        self.players.insert(
            id.clone(),
            PlayerRecord {
                id: id.clone(),
                user_id,
                name: name.to_string(),
                location: location.to_string(),
            },
        );
        id
    }

    /// Players currently in play (between `login_player` and `logout_player`).
    pub fn online_players(&self) -> Vec<PlayerId> {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn owner_of(&self, player_id: &PlayerId) -> Option<&StoredUser> {
        let player = self.players.get(player_id)?;
        self.users.values().find(|u| u.record.id == player.user_id)
    }
}

impl IdentityDirectory for InMemoryDirectory {
    fn validate_user(&self, user_name: &str, credential: &str) -> Result<UserRecord, IdentityError> {
        let stored = self
            .users
            .get(user_name)
            .or_else(|| self.owner_of(&PlayerId::new(user_name)))
            .ok_or(IdentityError::InvalidCredential)?;
        if stored.credential != credential {
            return Err(IdentityError::InvalidCredential);
        }
        Ok(stored.record.clone())
    }

    fn find_player(&self, player_id: &PlayerId) -> Option<PlayerRecord> {
        self.players.get(player_id).cloned()
    }

    fn login_player(&self, player: &PlayerRecord) {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player.id.clone());
    }

    fn logout_player(&self, player: &PlayerRecord) {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&player.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> InMemoryDirectory {
        let mut dir = InMemoryDirectory::new();
        let user = dir.add_user("Morgan", "pw");
        dir.add_player(user, "Morgan", "the square");
        dir.add_player(user, "Kestrel", "the tower");
        dir
    }

    #[test]
    fn test_validate_user_by_account_name() {
        let user = directory().validate_user("morgan", "pw").unwrap();
        assert_eq!(user.user_name, "morgan");
        assert_eq!(user.player_ids, vec![PlayerId::new("morgan"), PlayerId::new("kestrel")]);
    }

    #[test]
    fn test_validate_user_by_player_name_returns_owner() {
        let user = directory().validate_user("kestrel", "pw").unwrap();
        assert_eq!(user.user_name, "morgan");
    }

    #[test]
    fn test_validate_user_wrong_credential_rejected() {
        assert_eq!(
            directory().validate_user("morgan", "nope"),
            Err(IdentityError::InvalidCredential)
        );
    }

    #[test]
    fn test_validate_user_unknown_name_rejected() {
        assert_eq!(
            directory().validate_user("nobody", "pw"),
            Err(IdentityError::InvalidCredential)
        );
    }

    #[test]
    fn test_find_player_returns_record() {
        let player = directory().find_player(&PlayerId::new("KESTREL")).unwrap();
        assert_eq!(player.name, "Kestrel");
        assert_eq!(player.location, "the tower");
    }

    #[test]
    fn test_login_logout_tracks_online_players() {
        let dir = directory();
        let player = dir.find_player(&PlayerId::new("kestrel")).unwrap();
        dir.login_player(&player);
        assert_eq!(dir.online_players(), vec![PlayerId::new("kestrel")]);
        dir.logout_player(&player);
        assert!(dir.online_players().is_empty());
    }
}
