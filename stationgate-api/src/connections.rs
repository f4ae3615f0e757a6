//! Process-wide cache of live broker connections.
//!
//! One entry per [`IdentityKey`], grouped by tenant. Every operation takes the
//! single table lock for the duration of the map mutation only; callers close
//! displaced connections after the lock is released.

use stationgate_core::{BrokerConnection, IdentityKey, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A cached broker connection and the expiry of the credential behind it.
#[derive(Clone)]
pub struct CachedConnection {
    pub connection: Arc<dyn BrokerConnection>,
    /// Unix seconds
    pub expires_at: i64,
}

impl CachedConnection {
    pub fn new(connection: Arc<dyn BrokerConnection>, expires_at: i64) -> Self {
        Self {
            connection,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Dead or expired entries are eligible for eviction.
    pub fn is_stale(&self, now: i64) -> bool {
        self.is_expired(now) || !self.connection.is_connected()
    }
}

impl std::fmt::Debug for CachedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedConnection")
            .field("connected", &self.connection.is_connected())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Outcome of [`ConnectionCache::insert_if_absent`].
#[derive(Debug, Clone)]
pub enum Insertion {
    Inserted(CachedConnection),
    /// An entry was already present; the offered connection was not stored.
    Existing(CachedConnection),
}

type TenantTable = HashMap<String, CachedConnection>;

#[derive(Default)]
pub struct ConnectionCache {
    tenants: Mutex<HashMap<TenantId, TenantTable>>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    // The table holds no invariants a panicking writer could break halfway,
    // so a poisoned lock is recovered.
    fn table(&self) -> MutexGuard<'_, HashMap<TenantId, TenantTable>> {
        self.tenants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &IdentityKey) -> Option<CachedConnection> {
        self.table()
            .get(&key.tenant_id())
            .and_then(|users| users.get(key.username()))
            .cloned()
    }

    /// Store a connection, returning the entry it replaced (not closed).
    pub fn put(
        &self,
        key: &IdentityKey,
        connection: Arc<dyn BrokerConnection>,
        expires_at: i64,
    ) -> Option<CachedConnection> {
        self.table()
            .entry(key.tenant_id())
            .or_default()
            .insert(
                key.username().to_string(),
                CachedConnection::new(connection, expires_at),
            )
    }

    /// Remove and return the entry so the caller can close it.
    pub fn remove(&self, key: &IdentityKey) -> Option<CachedConnection> {
        let mut table = self.table();
        let users = table.get_mut(&key.tenant_id())?;
        let removed = users.remove(key.username());
        if users.is_empty() {
            table.remove(&key.tenant_id());
        }
        removed
    }

    /// Store the connection only if no entry exists for `key`.
    pub fn insert_if_absent(
        &self,
        key: &IdentityKey,
        connection: Arc<dyn BrokerConnection>,
        expires_at: i64,
    ) -> Insertion {
        let mut table = self.table();
        let users = table.entry(key.tenant_id()).or_default();
        match users.get(key.username()) {
            Some(existing) => Insertion::Existing(existing.clone()),
            None => {
                let entry = CachedConnection::new(connection, expires_at);
                users.insert(key.username().to_string(), entry.clone());
                Insertion::Inserted(entry)
            }
        }
    }

    /// Move an existing entry's expiry. Returns false when absent.
    pub fn update_expiry(&self, key: &IdentityKey, expires_at: i64) -> bool {
        match self
            .table()
            .get_mut(&key.tenant_id())
            .and_then(|users| users.get_mut(key.username()))
        {
            Some(entry) => {
                entry.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    /// Remove every entry matching `predicate`, dropping tenant sub-tables
    /// left empty. Returns the removed entries for the caller to close.
    pub fn evict_where<F>(&self, mut predicate: F) -> Vec<(IdentityKey, CachedConnection)>
    where
        F: FnMut(&IdentityKey, &CachedConnection) -> bool,
    {
        let mut evicted = Vec::new();
        let mut table = self.table();

        for (tenant_id, users) in table.iter_mut() {
            let doomed: Vec<String> = users
                .iter()
                .filter(|(username, entry)| {
                    predicate(&IdentityKey::new(*tenant_id, username), entry)
                })
                .map(|(username, _)| username.clone())
                .collect();

            for username in doomed {
                if let Some(entry) = users.remove(&username) {
                    evicted.push((IdentityKey::new(*tenant_id, &username), entry));
                }
            }
        }
        table.retain(|_, users| !users.is_empty());

        evicted
    }

    /// Empty the cache (shutdown).
    pub fn drain(&self) -> Vec<(IdentityKey, CachedConnection)> {
        let mut table = self.table();
        table
            .drain()
            .flat_map(|(tenant_id, users)| {
                users
                    .into_iter()
                    .map(move |(username, entry)| (IdentityKey::new(tenant_id, &username), entry))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tenant_count(&self) -> usize {
        self.table().len()
    }
}
