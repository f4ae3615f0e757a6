//! Connection Service
//!
//! Owns the process-wide connection cache and refresh sessions, and keeps
//! them consistent with the rest of the fleet through the control plane.
//!
//! Broker round-trips (connect, close, publish) never run while the cache
//! lock is held: every cache call below returns before the next `.await`.

use std::sync::Arc;

use stationgate_core::{
    BrokerConnection, BrokerConnector, BrokerLogin, Clock, ControlEvent, ControlPlane,
    IdentityKey, SessionGrant, SyncEvent,
};

use crate::config::BrokerConfig;
use crate::connections::{CachedConnection, ConnectionCache, Insertion};
use crate::constants::DEFAULT_JWT_EXPIRES_IN_MINUTES;
use crate::error::{ApiError, ApiResult};
use crate::middleware::CallerContext;
use crate::sessions::{RefreshSession, SessionStore};
use crate::telemetry::metrics::with_metrics;

/// What applying a replicated connection event did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new broker connection was opened and cached.
    Applied,
    /// An entry already existed; no connection was opened.
    Duplicate,
    /// A refresh session redeemed elsewhere was dropped.
    Revoked,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Applied => "applied",
            SyncOutcome::Duplicate => "duplicate",
            SyncOutcome::Revoked => "revoked",
        }
    }
}

/// Result of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted: usize,
    pub close_failures: usize,
    pub sessions_purged: usize,
}

pub struct ConnectionService {
    cache: ConnectionCache,
    sessions: SessionStore,
    connector: Arc<dyn BrokerConnector>,
    control_plane: Option<Arc<dyn ControlPlane>>,
    sync_subject: String,
    broker: BrokerConfig,
    /// Lifetime of lazily created root connections, in seconds
    compat_ttl_secs: i64,
    /// Seconds an entry outlives its expiry; matches the JWT clock skew so a
    /// token still accepted always finds its connection
    expiry_grace_secs: i64,
    clock: Arc<dyn Clock>,
}

impl ConnectionService {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        broker: BrokerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: ConnectionCache::new(),
            sessions: SessionStore::new(),
            connector,
            control_plane: None,
            sync_subject: String::new(),
            broker,
            compat_ttl_secs: DEFAULT_JWT_EXPIRES_IN_MINUTES * 60,
            expiry_grace_secs: 0,
            clock,
        }
    }

    /// Broadcast every newly cached connection on `subject`.
    pub fn with_control_plane(
        mut self,
        control_plane: Arc<dyn ControlPlane>,
        subject: impl Into<String>,
    ) -> Self {
        self.control_plane = Some(control_plane);
        self.sync_subject = subject.into();
        self
    }

    pub fn with_compat_ttl_minutes(mut self, minutes: i64) -> Self {
        self.compat_ttl_secs = minutes * 60;
        self
    }

    pub fn with_expiry_grace_secs(mut self, secs: i64) -> Self {
        self.expiry_grace_secs = secs.max(0);
        self
    }

    /// Disconnected, or expired for longer than the grace period.
    fn is_stale(&self, cached: &CachedConnection, now: i64) -> bool {
        cached.is_stale(now - self.expiry_grace_secs)
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn broker_config(&self) -> &BrokerConfig {
        &self.broker
    }

    pub fn now(&self) -> i64 {
        self.clock.now_epoch_secs()
    }

    pub fn sync_enabled(&self) -> bool {
        self.control_plane.is_some()
    }

    fn record_gauge(&self) {
        let count = self.cache.len();
        with_metrics(|metrics| metrics.set_cached_connections(count));
    }

    // ------------------------------------------------------------------------
    // AUTHENTICATION
    // ------------------------------------------------------------------------

    /// Log in to the broker as `login.identity` and cache the connection
    /// until `expires_at`, replacing any previous entry for that identity.
    pub async fn establish(
        &self,
        login: &BrokerLogin,
        expires_at: i64,
        session: Option<SessionGrant>,
    ) -> ApiResult<()> {
        let connection = self.connector.connect(login).await?;
        let previous = self.cache.put(&login.identity, connection, expires_at);
        self.record_gauge();

        if let Some(previous) = previous {
            close_quietly(&login.identity, previous).await;
        }

        if let Some(grant) = &session {
            self.register_session(&login.identity, login, grant);
        }

        tracing::info!(identity = %login.identity, expires_at, "Broker connection cached");
        self.broadcast(login, expires_at, session).await;
        Ok(())
    }

    /// Re-issue access for a redeemed refresh session. The cached connection
    /// is reused when still healthy; otherwise the session's credential opens
    /// a new one.
    pub async fn refresh(
        &self,
        session: RefreshSession,
        expires_at: i64,
        next_session: SessionGrant,
    ) -> ApiResult<()> {
        let login = BrokerLogin::new(session.identity, session.credential);
        let now = self.now();

        let reusable = self
            .cache
            .get(&login.identity)
            .map(|cached| !self.is_stale(&cached, now))
            .unwrap_or(false);

        if reusable && self.cache.update_expiry(&login.identity, expires_at) {
            tracing::debug!(identity = %login.identity, expires_at, "Cached connection extended");
        } else {
            let connection = self.connector.connect(&login).await?;
            let previous = self.cache.put(&login.identity, connection, expires_at);
            self.record_gauge();
            if let Some(previous) = previous {
                close_quietly(&login.identity, previous).await;
            }
            tracing::info!(identity = %login.identity, expires_at, "Broker connection re-established on refresh");
        }

        self.register_session(&login.identity, &login, &next_session);
        self.broadcast(&login, expires_at, Some(next_session)).await;
        Ok(())
    }

    /// Redeem a refresh session and revoke it on every other instance.
    ///
    /// The revocation goes out before any reconnect so a failed refresh still
    /// leaves the session unusable fleet-wide.
    pub async fn redeem_session(&self, session_id: &str, now: i64) -> Option<RefreshSession> {
        let session = self.sessions.take(session_id, now)?;
        self.publish(
            ControlEvent::revoke_session(session_id),
            &session.identity,
        )
        .await;
        Some(session)
    }

    fn register_session(&self, identity: &IdentityKey, login: &BrokerLogin, grant: &SessionGrant) {
        self.sessions.insert(
            grant.session_id.clone(),
            RefreshSession {
                identity: identity.clone(),
                credential: login.credential.clone(),
                expires_at: grant.expires_at,
            },
        );
    }

    // ------------------------------------------------------------------------
    // REQUEST PATH
    // ------------------------------------------------------------------------

    /// Connection serving `caller`.
    ///
    /// A user identity must already have a live cached connection. Requests
    /// without one act as the root identity, whose connection is opened on
    /// first use.
    pub async fn connection_for(
        &self,
        caller: &CallerContext,
    ) -> ApiResult<Arc<dyn BrokerConnection>> {
        let now = self.now();
        match caller {
            CallerContext::User(identity) => match self.cache.get(identity) {
                Some(cached) if !self.is_stale(&cached, now) => Ok(cached.connection),
                _ => Err(ApiError::connection_unavailable()),
            },
            CallerContext::Compat => self.root_connection(now).await,
        }
    }

    async fn root_connection(&self, now: i64) -> ApiResult<Arc<dyn BrokerConnection>> {
        let identity = self.broker.root_identity();
        match self.cache.get(&identity) {
            Some(cached) if !self.is_stale(&cached, now) => return Ok(cached.connection),
            Some(_) => {
                if let Some(stale) = self.cache.remove(&identity) {
                    close_quietly(&identity, stale).await;
                }
            }
            None => {}
        }

        let login = self.broker.root_login()?;
        let expires_at = now + self.compat_ttl_secs;
        let connection = self.connector.connect(&login).await?;

        match self
            .cache
            .insert_if_absent(&identity, connection.clone(), expires_at)
        {
            Insertion::Inserted(cached) => {
                self.record_gauge();
                tracing::info!(identity = %identity, expires_at, "Root broker connection cached");
                self.broadcast(&login, expires_at, None).await;
                Ok(cached.connection)
            }
            Insertion::Existing(existing) => {
                // Another request won the race; ours is surplus.
                close_quietly(&identity, CachedConnection::new(connection, expires_at)).await;
                Ok(existing.connection)
            }
        }
    }

    // ------------------------------------------------------------------------
    // CROSS-INSTANCE SYNC
    // ------------------------------------------------------------------------

    /// Apply any control-plane event received from another instance.
    pub async fn apply_control_event(&self, event: ControlEvent) -> ApiResult<SyncOutcome> {
        match event {
            ControlEvent::Connection(event) => self.apply_sync_event(event).await,
            ControlEvent::SessionRevoked { session_id } => {
                if self.sessions.revoke(&session_id) {
                    tracing::debug!(session_id = %session_id, "Refresh session revoked by peer");
                }
                Ok(SyncOutcome::Revoked)
            }
        }
    }

    /// Replicate a connection another instance cached.
    ///
    /// An identity already present locally only has its expiry moved forward,
    /// so replaying an event never opens a second connection.
    pub async fn apply_sync_event(&self, event: SyncEvent) -> ApiResult<SyncOutcome> {
        let login = BrokerLogin::new(event.identity.clone(), event.credential.clone());
        if let Some(grant) = &event.session {
            self.register_session(&event.identity, &login, grant);
        }

        if let Some(existing) = self.cache.get(&event.identity) {
            if event.expires_at > existing.expires_at {
                self.cache.update_expiry(&event.identity, event.expires_at);
            }
            return Ok(SyncOutcome::Duplicate);
        }

        let connection = self.connector.connect(&login).await?;
        match self
            .cache
            .insert_if_absent(&event.identity, connection.clone(), event.expires_at)
        {
            Insertion::Inserted(_) => {
                self.record_gauge();
                tracing::debug!(identity = %event.identity, expires_at = event.expires_at, "Replicated connection cached");
                Ok(SyncOutcome::Applied)
            }
            Insertion::Existing(_) => {
                close_quietly(
                    &event.identity,
                    CachedConnection::new(connection, event.expires_at),
                )
                .await;
                Ok(SyncOutcome::Duplicate)
            }
        }
    }

    async fn broadcast(&self, login: &BrokerLogin, expires_at: i64, session: Option<SessionGrant>) {
        let mut event = SyncEvent::new(login.identity.clone(), login.credential.clone(), expires_at);
        if let Some(grant) = session {
            event = event.with_session(grant);
        }
        self.publish(ControlEvent::Connection(event), &login.identity)
            .await;
    }

    async fn publish(&self, event: ControlEvent, identity: &IdentityKey) {
        let Some(control_plane) = &self.control_plane else {
            return;
        };

        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "Failed to encode control event");
                return;
            }
        };

        match control_plane.publish(&self.sync_subject, payload).await {
            Ok(()) => with_metrics(|metrics| metrics.record_sync_event("published")),
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Failed to broadcast control event");
                with_metrics(|metrics| metrics.record_sync_event("publish_failed"));
            }
        }
    }

    // ------------------------------------------------------------------------
    // MAINTENANCE
    // ------------------------------------------------------------------------

    /// Evict disconnected or expired connections and expired sessions.
    pub async fn reap(&self) -> ReapReport {
        let now = self.now();
        let cutoff = now - self.expiry_grace_secs;
        let evicted = self.cache.evict_where(|_, cached| cached.is_stale(cutoff));
        self.record_gauge();

        let mut report = ReapReport {
            evicted: evicted.len(),
            ..ReapReport::default()
        };

        for (identity, cached) in evicted {
            if let Err(e) = cached.connection.close().await {
                report.close_failures += 1;
                tracing::warn!(identity = %identity, error = %e, "Failed to close reaped connection");
            }
        }

        report.sessions_purged = self.sessions.purge_expired(now);
        report
    }

    /// Close every cached connection. Used at shutdown.
    pub async fn close_all(&self) -> usize {
        let drained = self.cache.drain();
        self.record_gauge();
        let count = drained.len();
        for (identity, cached) in drained {
            close_quietly(&identity, cached).await;
        }
        count
    }
}

async fn close_quietly(identity: &IdentityKey, cached: CachedConnection) {
    if let Err(e) = cached.connection.close().await {
        tracing::warn!(identity = %identity, error = %e, "Failed to close broker connection");
    }
}

// ============================================================================
// TESTS
// ============================================================================
