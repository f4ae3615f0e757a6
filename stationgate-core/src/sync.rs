//! Control-plane connection sync events.
//!
//! Wire shape:
//!
//! ```json
//! {"type": "update_connection",
//!  "update": {"username": "alice", "account_id": 1,
//!             "connection_token": "...", "token_expiry": 1704070800}}
//! ```
//!
//! Exactly one of `password` / `connection_token` is present. `session_id` and
//! `session_expiry` are optional and only set when a refresh session was
//! issued alongside the connection.
//!
//! A redeemed refresh session is revoked fleet-wide with:
//!
//! ```json
//! {"type": "revoke_session", "update": {"session_id": "..."}}
//! ```

use crate::broker::BrokerCredential;
use crate::error::{GatewayError, GatewayResult};
use crate::identity::{IdentityKey, TenantId};
use serde::{Deserialize, Serialize};

/// Envelope published on the control-plane subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "update", rename_all = "snake_case")]
pub enum ControlMessage {
    UpdateConnection(ConnectionUpdate),
    RevokeSession(SessionRevocation),
}

/// Payload of a `revoke_session` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRevocation {
    pub session_id: String,
}

/// Payload of an `update_connection` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    pub username: String,
    pub account_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_token: Option<String>,
    /// Unix seconds after which the replicated connection must be dropped.
    pub token_expiry: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expiry: Option<i64>,
}

/// Refresh session announced together with a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub session_id: String,
    pub expires_at: i64,
}

/// Decoded "connection established" event.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub identity: IdentityKey,
    pub credential: BrokerCredential,
    pub expires_at: i64,
    pub session: Option<SessionGrant>,
}

impl SyncEvent {
    pub fn new(identity: IdentityKey, credential: BrokerCredential, expires_at: i64) -> Self {
        Self {
            identity,
            credential,
            expires_at,
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionGrant) -> Self {
        self.session = Some(session);
        self
    }

    pub fn to_wire(&self) -> ControlMessage {
        let (password, connection_token) = match &self.credential {
            BrokerCredential::Password(_) => (Some(self.credential.expose().to_string()), None),
            BrokerCredential::ConnectionToken(_) => {
                (None, Some(self.credential.expose().to_string()))
            }
        };

        ControlMessage::UpdateConnection(ConnectionUpdate {
            username: self.identity.username().to_string(),
            account_id: self.identity.tenant_id().as_i64(),
            password,
            connection_token,
            token_expiry: self.expires_at,
            session_id: self.session.as_ref().map(|s| s.session_id.clone()),
            session_expiry: self.session.as_ref().map(|s| s.expires_at),
        })
    }

    pub fn from_wire(update: ConnectionUpdate) -> GatewayResult<Self> {
        if update.username.trim().is_empty() {
            return Err(malformed("username is empty"));
        }

        let credential = match (update.password, update.connection_token) {
            (Some(password), None) => BrokerCredential::password(password),
            (None, Some(token)) => BrokerCredential::connection_token(token),
            (Some(_), Some(_)) => {
                return Err(malformed("both password and connection_token are set"))
            }
            (None, None) => return Err(malformed("no credential present")),
        };

        let session = match (update.session_id, update.session_expiry) {
            (Some(session_id), Some(expires_at)) => Some(SessionGrant {
                session_id,
                expires_at,
            }),
            _ => None,
        };

        Ok(Self {
            identity: IdentityKey::new(TenantId::new(update.account_id), &update.username),
            credential,
            expires_at: update.token_expiry,
            session,
        })
    }

    pub fn encode(&self) -> GatewayResult<Vec<u8>> {
        serde_json::to_vec(&self.to_wire()).map_err(|e| malformed(&e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> GatewayResult<Self> {
        match ControlEvent::decode(bytes)? {
            ControlEvent::Connection(event) => Ok(event),
            ControlEvent::SessionRevoked { .. } => {
                Err(malformed("expected update_connection, got revoke_session"))
            }
        }
    }
}

/// Any decoded control-plane event.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// Another instance cached a connection.
    Connection(SyncEvent),
    /// Another instance redeemed this refresh session.
    SessionRevoked { session_id: String },
}

impl ControlEvent {
    pub fn revoke_session(session_id: impl Into<String>) -> Self {
        ControlEvent::SessionRevoked {
            session_id: session_id.into(),
        }
    }

    pub fn encode(&self) -> GatewayResult<Vec<u8>> {
        match self {
            ControlEvent::Connection(event) => event.encode(),
            ControlEvent::SessionRevoked { session_id } => {
                let message = ControlMessage::RevokeSession(SessionRevocation {
                    session_id: session_id.clone(),
                });
                serde_json::to_vec(&message).map_err(|e| malformed(&e.to_string()))
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> GatewayResult<Self> {
        let message: ControlMessage =
            serde_json::from_slice(bytes).map_err(|e| malformed(&e.to_string()))?;
        match message {
            ControlMessage::UpdateConnection(update) => {
                SyncEvent::from_wire(update).map(ControlEvent::Connection)
            }
            ControlMessage::RevokeSession(revocation) => {
                if revocation.session_id.trim().is_empty() {
                    return Err(malformed("session_id is empty"));
                }
                Ok(ControlEvent::SessionRevoked {
                    session_id: revocation.session_id,
                })
            }
        }
    }
}

fn malformed(reason: &str) -> GatewayError {
    GatewayError::MalformedEvent {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> IdentityKey {
        IdentityKey::new(TenantId::new(1), "alice")
    }

    #[test]
    fn test_wire_shape_matches_contract() -> Result<(), serde_json::Error> {
        let event = SyncEvent::new(alice(), BrokerCredential::connection_token("tok"), 1_700);
        let value = serde_json::to_value(event.to_wire())?;
        assert_eq!(
            value,
            json!({
                "type": "update_connection",
                "update": {
                    "username": "alice",
                    "account_id": 1,
                    "connection_token": "tok",
                    "token_expiry": 1_700
                }
            })
        );
        Ok(())
    }

    #[test]
    fn test_decode_password_event_normalizes_username() -> GatewayResult<()> {
        let bytes = br#"{"type":"update_connection","update":{"username":"Bob","account_id":3,"password":"pw","token_expiry":99}}"#;
        let event = SyncEvent::decode(bytes)?;
        assert_eq!(event.identity, IdentityKey::new(TenantId::new(3), "bob"));
        assert_eq!(event.credential.kind(), "password");
        assert_eq!(event.credential.expose(), "pw");
        assert_eq!(event.expires_at, 99);
        assert!(event.session.is_none());
        Ok(())
    }

    #[test]
    fn test_session_fields_survive_encoding() -> GatewayResult<()> {
        let event = SyncEvent::new(alice(), BrokerCredential::password("pw"), 10).with_session(
            SessionGrant {
                session_id: "sid-1".to_string(),
                expires_at: 20,
            },
        );
        let decoded = SyncEvent::decode(&event.encode()?)?;
        assert_eq!(
            decoded.session,
            Some(SessionGrant {
                session_id: "sid-1".to_string(),
                expires_at: 20
            })
        );
        Ok(())
    }

    #[test]
    fn test_decode_rejects_missing_credential() {
        let bytes = br#"{"type":"update_connection","update":{"username":"bob","account_id":1,"token_expiry":1}}"#;
        assert!(matches!(
            SyncEvent::decode(bytes),
            Err(GatewayError::MalformedEvent { .. })
        ));
    }

    #[test]
    fn test_revocation_wire_shape() -> GatewayResult<()> {
        let bytes = ControlEvent::revoke_session("sid-9").encode()?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| malformed(&e.to_string()))?;
        assert_eq!(
            value,
            json!({"type": "revoke_session", "update": {"session_id": "sid-9"}})
        );
        assert!(matches!(
            ControlEvent::decode(&bytes)?,
            ControlEvent::SessionRevoked { session_id } if session_id == "sid-9"
        ));
        Ok(())
    }

    #[test]
    fn test_connection_decoder_rejects_revocation() -> GatewayResult<()> {
        let bytes = ControlEvent::revoke_session("sid-9").encode()?;
        assert!(matches!(
            SyncEvent::decode(&bytes),
            Err(GatewayError::MalformedEvent { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_decode_rejects_empty_revocation() {
        let bytes = br#"{"type":"revoke_session","update":{"session_id":" "}}"#;
        assert!(ControlEvent::decode(bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let bytes = br#"{"type":"drop_everything","update":{}}"#;
        assert!(SyncEvent::decode(bytes).is_err());
    }
}
