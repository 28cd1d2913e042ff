//! Session token registry and password hashing.

use std::sync::Arc;

use common::User;
use dashmap::DashMap;
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// Process-wide mapping from opaque session tokens to authenticated users.
///
/// Tokens are inserted at login and shared by every session. They are never
/// expired and never removed on disconnect: other live sessions may share
/// the user, and a stateless transport re-attaches with the same token on
/// every request. Lookups happen once per inbound frame, so the map is
/// lock-free.
#[derive(Default)]
pub struct TokenRegistry {
    tokens: DashMap<String, Arc<User>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh opaque session token.
    pub fn mint(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn insert(&self, token: String, user: Arc<User>) {
        self.tokens.insert(token, user);
    }

    pub fn get(&self, token: &str) -> Option<Arc<User>> {
        self.tokens.get(token).map(|u| u.clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// SHA-1 digest of `text`, rendered as 40 lowercase hex chars, the format
/// stored on user records.
pub fn password_digest(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
