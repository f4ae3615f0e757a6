//! Server-side refresh sessions.
//!
//! Refresh tokens carry only a session id. The broker credential needed to
//! reconnect on refresh stays here until the refresh token expires or the
//! session is redeemed, whichever comes first.

use stationgate_core::{BrokerCredential, IdentityKey};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub struct RefreshSession {
    pub identity: IdentityKey,
    pub credential: BrokerCredential,
    /// Unix seconds
    pub expires_at: i64,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, RefreshSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, RefreshSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, session_id: impl Into<String>, session: RefreshSession) {
        self.table().insert(session_id.into(), session);
    }

    /// Redeem a session. Sessions are single-use; expired ones are dropped.
    pub fn take(&self, session_id: &str, now: i64) -> Option<RefreshSession> {
        self.table()
            .remove(session_id)
            .filter(|session| session.expires_at >= now)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.table().contains_key(session_id)
    }

    /// Drop a session another instance redeemed.
    pub fn revoke(&self, session_id: &str) -> bool {
        self.table().remove(session_id).is_some()
    }

    pub fn purge_expired(&self, now: i64) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, session| session.expires_at >= now);
        before - table.len()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationgate_test_utils::fixtures::alice;

    fn session(expires_at: i64) -> RefreshSession {
        RefreshSession {
            identity: alice(),
            credential: BrokerCredential::password("pw"),
            expires_at,
        }
    }

    #[test]
    fn test_take_is_single_use() {
        let store = SessionStore::new();
        store.insert("sid", session(100));

        let taken = store.take("sid", 50).map(|s| s.identity);
        assert_eq!(taken, Some(alice()));
        assert!(store.take("sid", 50).is_none());
    }

    #[test]
    fn test_take_rejects_expired() {
        let store = SessionStore::new();
        store.insert("sid", session(100));
        assert!(store.take("sid", 101).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_revoked_session_cannot_be_taken() {
        let store = SessionStore::new();
        store.insert("sid", session(100));

        assert!(store.revoke("sid"));
        assert!(!store.contains("sid"));
        assert!(!store.revoke("sid"));
        assert!(store.take("sid", 50).is_none());
    }

    #[test]
    fn test_purge_expired() {
        let store = SessionStore::new();
        store.insert("old", session(10));
        store.insert("new", session(1_000));

        assert_eq!(store.purge_expired(500), 1);
        assert_eq!(store.len(), 1);
        assert!(store.take("new", 500).is_some());
    }
}
