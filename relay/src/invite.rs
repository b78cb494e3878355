//! Single-use invite tokens.
//!
//! Tokens are 24 CSPRNG bytes, base64url-encoded to 32 characters, bound
//! to one room, valid for 24 hours, and consumed atomically on the join
//! path. Destroying a room revokes every token minted for it. Possessing a
//! valid token never bypasses host approval.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;

use rooms_protocol::core::{
    INVITE_TOKEN_SIZE, INVITE_TOKEN_TEXT_LEN, INVITE_TOKEN_TTL, MAX_INVITES_PER_ROOM,
    MAX_INVITES_TOTAL,
};

/// Why a token could not be minted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreateError {
    /// Per-room or server-wide token cap reached.
    #[error("invite token limit reached")]
    TokenLimit,
    /// The OS CSPRNG failed.
    #[error("random generation failed")]
    RandomFailed,
}

/// Why a token could not be consumed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsumeError {
    /// Never minted, already used, or already revoked.
    #[error("token not found")]
    TokenNotFound,
    /// Minted but past its TTL.
    #[error("token expired")]
    TokenExpired,
    /// Minted for a different room.
    #[error("token bound to a different room")]
    RoomMismatch,
}

/// Result of a non-consuming validation peek.
#[derive(Debug, Serialize)]
pub struct ValidateResult {
    /// Whether the token would currently be accepted.
    pub valid: bool,
    /// The bound room id, when valid.
    #[serde(rename = "roomId", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Failure detail, when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

#[derive(Debug)]
struct Invite {
    room_id: String,
    expires_at: Instant,
}

/// The relay's invite token table.
#[derive(Debug, Default)]
pub struct InviteStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tokens: HashMap<String, Invite>,
    per_room: HashMap<String, usize>,
}

impl InviteStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token for `room_id`.
    ///
    /// Returns the token text and its TTL. The caller has already checked
    /// that the room exists.
    pub fn create(&self, room_id: &str) -> Result<(String, Duration), CreateError> {
        let mut inner = self.inner.lock().expect("invite lock poisoned");
        Self::purge_expired(&mut inner);

        if inner.tokens.len() >= MAX_INVITES_TOTAL {
            return Err(CreateError::TokenLimit);
        }
        let room_count = inner.per_room.get(room_id).copied().unwrap_or(0);
        if room_count >= MAX_INVITES_PER_ROOM {
            return Err(CreateError::TokenLimit);
        }

        let mut raw = [0u8; INVITE_TOKEN_SIZE];
        OsRng
            .try_fill_bytes(&mut raw)
            .map_err(|_| CreateError::RandomFailed)?;
        let token = URL_SAFE_NO_PAD.encode(raw);
        debug_assert_eq!(token.len(), INVITE_TOKEN_TEXT_LEN);

        inner.tokens.insert(
            token.clone(),
            Invite {
                room_id: room_id.to_string(),
                expires_at: Instant::now() + INVITE_TOKEN_TTL,
            },
        );
        *inner.per_room.entry(room_id.to_string()).or_insert(0) += 1;
        Ok((token, INVITE_TOKEN_TTL))
    }

    /// Peek at a token without consuming it.
    pub fn validate(&self, token: &str) -> ValidateResult {
        let inner = self.inner.lock().expect("invite lock poisoned");
        match inner.tokens.get(token) {
            Some(invite) if invite.expires_at > Instant::now() => ValidateResult {
                valid: true,
                room_id: Some(invite.room_id.clone()),
                error: None,
            },
            Some(_) => ValidateResult {
                valid: false,
                room_id: None,
                error: Some("TokenExpired"),
            },
            None => ValidateResult {
                valid: false,
                room_id: None,
                error: Some("TokenNotFound"),
            },
        }
    }

    /// Consume a token for a join attempt. Atomic: the first caller wins,
    /// every later caller sees `TokenNotFound`.
    pub fn consume(&self, token: &str, room_id: &str) -> Result<(), ConsumeError> {
        let mut inner = self.inner.lock().expect("invite lock poisoned");
        let invite = match inner.tokens.get(token) {
            Some(invite) => invite,
            None => return Err(ConsumeError::TokenNotFound),
        };
        if invite.expires_at <= Instant::now() {
            Self::remove(&mut inner, token);
            return Err(ConsumeError::TokenExpired);
        }
        if invite.room_id != room_id {
            // Deliberately NOT consumed: the token is still good for its
            // own room.
            return Err(ConsumeError::RoomMismatch);
        }
        Self::remove(&mut inner, token);
        Ok(())
    }

    /// Revoke every token bound to `room_id` (room destroy).
    pub fn revoke_room(&self, room_id: &str) -> usize {
        let mut inner = self.inner.lock().expect("invite lock poisoned");
        let before = inner.tokens.len();
        inner.tokens.retain(|_, invite| invite.room_id != room_id);
        inner.per_room.remove(room_id);
        before - inner.tokens.len()
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("invite lock poisoned").tokens.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(inner: &mut Inner, token: &str) {
        if let Some(invite) = inner.tokens.remove(token) {
            if let Some(count) = inner.per_room.get_mut(&invite.room_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.per_room.remove(&invite.room_id);
                }
            }
        }
    }

    fn purge_expired(inner: &mut Inner) {
        let now = Instant::now();
        let expired: Vec<String> = inner
            .tokens
            .iter()
            .filter(|(_, invite)| invite.expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            Self::remove(inner, &token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let store = InviteStore::new();
        let (token, ttl) = store.create("room-1").unwrap();
        assert_eq!(token.len(), INVITE_TOKEN_TEXT_LEN);
        assert_eq!(ttl, INVITE_TOKEN_TTL);
        assert!(!token.contains('='));
    }

    #[test]
    fn test_single_use_consumption() {
        let store = InviteStore::new();
        let (token, _) = store.create("room-1").unwrap();

        // Client A consumes; client B gets TokenNotFound.
        assert!(store.consume(&token, "room-1").is_ok());
        assert_eq!(
            store.consume(&token, "room-1"),
            Err(ConsumeError::TokenNotFound)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_validate_does_not_consume() {
        let store = InviteStore::new();
        let (token, _) = store.create("room-1").unwrap();

        let peek = store.validate(&token);
        assert!(peek.valid);
        assert_eq!(peek.room_id.as_deref(), Some("room-1"));

        // Still consumable after any number of peeks.
        assert!(store.validate(&token).valid);
        assert!(store.consume(&token, "room-1").is_ok());

        let gone = store.validate(&token);
        assert!(!gone.valid);
        assert_eq!(gone.error, Some("TokenNotFound"));
    }

    #[test]
    fn test_room_mismatch_preserves_token() {
        let store = InviteStore::new();
        let (token, _) = store.create("room-1").unwrap();

        assert_eq!(
            store.consume(&token, "room-2"),
            Err(ConsumeError::RoomMismatch)
        );
        // Still valid for its own room.
        assert!(store.consume(&token, "room-1").is_ok());
    }

    #[test]
    fn test_revoke_room_invalidates_all() {
        let store = InviteStore::new();
        let (token_a, _) = store.create("room-1").unwrap();
        let (token_b, _) = store.create("room-1").unwrap();
        let (token_c, _) = store.create("room-2").unwrap();

        assert_eq!(store.revoke_room("room-1"), 2);
        assert_eq!(
            store.consume(&token_a, "room-1"),
            Err(ConsumeError::TokenNotFound)
        );
        assert_eq!(
            store.consume(&token_b, "room-1"),
            Err(ConsumeError::TokenNotFound)
        );
        assert!(store.consume(&token_c, "room-2").is_ok());
    }

    #[test]
    fn test_per_room_cap() {
        let store = InviteStore::new();
        for _ in 0..MAX_INVITES_PER_ROOM {
            store.create("room-1").unwrap();
        }
        assert_eq!(store.create("room-1"), Err(CreateError::TokenLimit));
        // Other rooms are unaffected.
        assert!(store.create("room-2").is_ok());
    }
}
