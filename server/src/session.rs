//! Reconnect tokens and saved player state.
//!
//! Every player gets a random token at handshake. When a player drops
//! without saying goodbye its last authoritative state is parked under the
//! token for `ttl_ms`; presenting the token again within that window
//! restores it.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use shared::protocol::DisconnectCode;
use shared::time::Clock;
use shared::{PlayerId, PlayerState};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

const TOKEN_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub ttl_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_ms: 30_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown session token")]
    Invalid,
    #[error("session expired")]
    Expired,
}

impl SessionError {
    pub fn disconnect_code(&self) -> DisconnectCode {
        match self {
            SessionError::Invalid => DisconnectCode::InvalidSession,
            SessionError::Expired => DisconnectCode::SessionExpired,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedSession {
    pub token: String,
    pub player_id: PlayerId,
    pub state: PlayerState,
    pub saved_at: i64,
    pub tick: u32,
}

pub struct SessionManager {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    active: HashMap<String, PlayerId>,
    saved: HashMap<String, SavedSession>,
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl SessionManager {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            active: HashMap::new(),
            saved: HashMap::new(),
        }
    }

    pub fn issue(&mut self, player_id: PlayerId) -> String {
        let token = generate_token();
        self.active.insert(token.clone(), player_id);
        token
    }

    pub fn token_for(&self, player_id: PlayerId) -> Option<&str> {
        self.active
            .iter()
            .find(|(_, id)| **id == player_id)
            .map(|(token, _)| token.as_str())
    }

    /// Live player currently holding `token`.
    pub fn player_for(&self, token: &str) -> Option<PlayerId> {
        self.active.get(token).copied()
    }

    /// Parks a departing player's state under its token.
    pub fn save(&mut self, player_id: PlayerId, state: PlayerState, tick: u32) -> bool {
        let token = match self.token_for(player_id) {
            Some(token) => token.to_string(),
            None => return false,
        };
        self.active.remove(&token);
        let saved_at = self.clock.now_millis();
        self.saved.insert(
            token.clone(),
            SavedSession {
                token,
                player_id,
                state,
                saved_at,
                tick,
            },
        );
        true
    }

    /// Forgets a player's token without saving anything.
    pub fn revoke(&mut self, player_id: PlayerId) {
        self.active.retain(|_, id| *id != player_id);
    }

    /// Consumes a saved session. An expired one is discarded.
    pub fn resume(&mut self, token: &str) -> Result<SavedSession, SessionError> {
        let saved = self.saved.remove(token).ok_or(SessionError::Invalid)?;
        if self.clock.now_millis() - saved.saved_at > self.config.ttl_ms {
            return Err(SessionError::Expired);
        }
        Ok(saved)
    }

    /// Binds an existing token to a (new) live player.
    pub fn rebind(&mut self, token: &str, player_id: PlayerId) {
        self.active.insert(token.to_string(), player_id);
    }

    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now_millis();
        let ttl = self.config.ttl_ms;
        let before = self.saved.len();
        self.saved.retain(|_, s| now - s.saved_at <= ttl);
        before - self.saved.len()
    }

    pub fn saved_count(&self) -> usize {
        self.saved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::time::ManualClock;

    fn manager(clock: &ManualClock) -> SessionManager {
        SessionManager::new(SessionConfig::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn test_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_save_and_resume() {
        let clock = ManualClock::new(0);
        let mut sessions = manager(&clock);
        let token = sessions.issue(3);
        assert_eq!(sessions.player_for(&token), Some(3));

        let state = PlayerState::new(3, [4.0, 0.0, 4.0]);
        assert!(sessions.save(3, state.clone(), 120));
        assert_eq!(sessions.player_for(&token), None);

        clock.advance(1_000);
        let saved = sessions.resume(&token).unwrap();
        assert_eq!(saved.state, state);
        assert_eq!(saved.tick, 120);

        assert_eq!(sessions.resume(&token), Err(SessionError::Invalid));
    }

    #[test]
    fn test_expired_session() {
        let clock = ManualClock::new(0);
        let mut sessions = manager(&clock);
        let token = sessions.issue(1);
        sessions.save(1, PlayerState::new(1, [0.0; 3]), 0);
        clock.advance(30_001);
        assert_eq!(sessions.resume(&token), Err(SessionError::Expired));
        assert_eq!(
            SessionError::Expired.disconnect_code(),
            DisconnectCode::SessionExpired
        );
    }

    #[test]
    fn test_unknown_token() {
        let clock = ManualClock::new(0);
        let mut sessions = manager(&clock);
        assert_eq!(sessions.resume("nope"), Err(SessionError::Invalid));
    }

    #[test]
    fn test_revoke_prevents_save() {
        let clock = ManualClock::new(0);
        let mut sessions = manager(&clock);
        sessions.issue(1);
        sessions.revoke(1);
        assert!(!sessions.save(1, PlayerState::new(1, [0.0; 3]), 0));
    }

    #[test]
    fn test_rebind_and_purge() {
        let clock = ManualClock::new(0);
        let mut sessions = manager(&clock);
        let token = sessions.issue(1);
        sessions.save(1, PlayerState::new(1, [0.0; 3]), 0);
        sessions.resume(&token).unwrap();
        sessions.rebind(&token, 7);
        assert_eq!(sessions.player_for(&token), Some(7));

        let other = sessions.issue(8);
        sessions.save(8, PlayerState::new(8, [0.0; 3]), 0);
        clock.advance(60_000);
        assert_eq!(sessions.purge_expired(), 1);
        assert_eq!(sessions.resume(&other), Err(SessionError::Invalid));
    }
}
