//! Tenant and identity keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker account (tenant) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

/// Account used when a request does not name one.
pub const DEFAULT_TENANT_ID: TenantId = TenantId(1);

impl TenantId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        DEFAULT_TENANT_ID
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a username for use as a cache key.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Key addressing exactly one cached broker connection.
///
/// Usernames compare case-insensitively, so the key stores them trimmed and
/// lower-cased. Two keys built from `"Alice"` and `" alice "` are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    tenant_id: TenantId,
    username: String,
}

impl IdentityKey {
    pub fn new(tenant_id: TenantId, username: &str) -> Self {
        Self {
            tenant_id,
            username: normalize_username(username),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.username)
    }
}
