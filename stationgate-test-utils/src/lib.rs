//! stationgate Test Utilities
//!
//! Shared test infrastructure for the stationgate workspace:
//! - In-process mock broker (connector, connections, control plane)
//! - Manual clock
//! - Proptest generators
//! - Test fixtures for common scenarios

pub use stationgate_storage::InMemoryMessageBuffer;

pub use stationgate_core::{
    BrokerConnection, BrokerConnector, BrokerCredential, BrokerError, BrokerLogin, BrokerResult,
    Clock, ControlPlane, FetchRequest, FetchedMessage, IdentityKey, MessageAcker,
    OutboundMessage, PendingMessage, SyncEvent, TenantId,
};

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK BROKER
// ============================================================================

/// Message the mock broker recorded as produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedMessage {
    pub username: String,
    pub station: String,
    pub producer_name: String,
    pub message: OutboundMessage,
}

#[derive(Default)]
struct BrokerState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    acks: AtomicUsize,
    invalidations: AtomicUsize,
    produce_attempts: AtomicUsize,
    fail_acks: AtomicBool,
    timeout_on_empty: AtomicBool,
    fetch_delay_ms: AtomicUsize,
    connect_delay_ms: AtomicUsize,
    rejected_users: Mutex<HashSet<String>>,
    connect_failure: Mutex<Option<BrokerError>>,
    produce_failures: Mutex<VecDeque<BrokerError>>,
    produced: Mutex<Vec<ProducedMessage>>,
    station_queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    fetch_log: Mutex<Vec<FetchRequest>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

/// Scriptable in-process broker.
///
/// Cloning shares state, so a test keeps one handle for assertions and gives
/// another to the code under test.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue payloads for the next fetches on `station`.
    pub fn enqueue(&self, station: &str, payloads: impl IntoIterator<Item = Vec<u8>>) {
        lock(&self.state.station_queues)
            .entry(station.to_string())
            .or_default()
            .extend(payloads);
    }

    /// Reject logins for `username` with an authorization violation.
    pub fn reject_user(&self, username: &str) {
        lock(&self.state.rejected_users).insert(username.to_lowercase());
    }

    /// Fail every connect attempt with `error` until cleared.
    pub fn fail_connects_with(&self, error: Option<BrokerError>) {
        *lock(&self.state.connect_failure) = error;
    }

    /// Fail the next produce calls, one scripted error per call.
    pub fn fail_next_produces(&self, errors: impl IntoIterator<Item = BrokerError>) {
        lock(&self.state.produce_failures).extend(errors);
    }

    pub fn fail_acks(&self, fail: bool) {
        self.state.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Report a timeout instead of an empty batch when a station has nothing queued.
    pub fn timeout_on_empty(&self, enabled: bool) {
        self.state.timeout_on_empty.store(enabled, Ordering::SeqCst);
    }

    /// Delay every fetch by `delay` before it returns.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state
            .fetch_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Delay every connect by `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn ack_count(&self) -> usize {
        self.state.acks.load(Ordering::SeqCst)
    }

    pub fn invalidation_count(&self) -> usize {
        self.state.invalidations.load(Ordering::SeqCst)
    }

    pub fn produce_attempts(&self) -> usize {
        self.state.produce_attempts.load(Ordering::SeqCst)
    }

    pub fn produced(&self) -> Vec<ProducedMessage> {
        lock(&self.state.produced).clone()
    }

    pub fn fetch_log(&self) -> Vec<FetchRequest> {
        lock(&self.state.fetch_log).clone()
    }

    /// Every connection opened so far, oldest first.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        lock(&self.state.connections).clone()
    }

    /// Simulate the broker dropping every open connection.
    pub fn disconnect_all(&self) {
        for connection in lock(&self.state.connections).iter() {
            connection.disconnect();
        }
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    async fn connect(&self, login: &BrokerLogin) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if let Some(error) = lock(&self.state.connect_failure).clone() {
            return Err(error);
        }
        let username = login.identity.username().to_string();
        if lock(&self.state.rejected_users).contains(&username) {
            return Err(BrokerError::classify("", "nats: Authorization Violation"));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(MockConnection {
            username,
            credential_kind: login.credential.kind(),
            connected: AtomicBool::new(true),
            state: self.state.clone(),
        });
        lock(&self.state.connections).push(connection.clone());
        Ok(connection)
    }
}

/// Connection handed out by [`MockBroker`].
pub struct MockConnection {
    username: String,
    credential_kind: &'static str,
    connected: AtomicBool,
    state: Arc<BrokerState>,
}

impl MockConnection {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn credential_kind(&self) -> &'static str {
        self.credential_kind
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

struct MockAcker {
    state: Arc<BrokerState>,
}

#[async_trait]
impl MessageAcker for MockAcker {
    async fn ack(&self) -> BrokerResult<()> {
        if self.state.fail_acks.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport {
                reason: "ack rejected".to_string(),
            });
        }
        self.state.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for MockConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn produce(
        &self,
        station: &str,
        producer_name: &str,
        message: &OutboundMessage,
    ) -> BrokerResult<()> {
        self.state.produce_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        if let Some(error) = lock(&self.state.produce_failures).pop_front() {
            return Err(error);
        }
        lock(&self.state.produced).push(ProducedMessage {
            username: self.username.clone(),
            station: station.to_string(),
            producer_name: producer_name.to_string(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn invalidate_producer(&self, _station: &str, _producer_name: &str) {
        self.state.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    async fn fetch(&self, request: &FetchRequest) -> BrokerResult<Vec<FetchedMessage>> {
        lock(&self.state.fetch_log).push(request.clone());

        let delay = self.state.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }

        let payloads: Vec<Vec<u8>> = {
            let mut queues = lock(&self.state.station_queues);
            let queue = queues.entry(request.station.clone()).or_default();
            let take = request.batch_size.min(queue.len());
            queue.drain(..take).collect()
        };

        if payloads.is_empty() && self.state.timeout_on_empty.load(Ordering::SeqCst) {
            return Err(BrokerError::Timeout {
                operation: format!("fetch {}", request.station),
            });
        }

        Ok(payloads
            .into_iter()
            .map(|payload| {
                FetchedMessage::new(
                    payload,
                    BTreeMap::new(),
                    Box::new(MockAcker {
                        state: self.state.clone(),
                    }),
                )
            })
            .collect())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// MOCK CONTROL PLANE
// ============================================================================

/// Control plane backed by a tokio broadcast channel.
///
/// Every clone shares one bus, so two gateway states built from clones of the
/// same `MockControlPlane` behave like two instances on one cluster.
#[derive(Clone)]
pub struct MockControlPlane {
    bus: Arc<Mutex<broadcast::Sender<(String, Vec<u8>)>>>,
    connected: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    subscriptions: Arc<AtomicUsize>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            bus: Arc::new(Mutex::new(sender)),
            connected: Arc::new(AtomicBool::new(true)),
            published: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Everything published so far, as (subject, payload).
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.published).clone()
    }

    /// Number of successful `subscribe` calls.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// End every open subscription stream.
    pub fn drop_subscriptions(&self) {
        let (sender, _) = broadcast::channel(256);
        *lock(&self.bus) = sender;
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BrokerResult<()> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        lock(&self.published).push((subject.to_string(), payload.clone()));
        // No live subscribers is not an error.
        let _ = lock(&self.bus).send((subject.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> BrokerResult<BoxStream<'static, Vec<u8>>> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        let receiver = lock(&self.bus).subscribe();
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let subject = subject.to_string();

        let stream = futures_util::stream::unfold(receiver, move |mut receiver| {
            let subject = subject.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok((s, payload)) if s == subject => return Some((payload, receiver)),
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock the test moves by hand. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for stationgate types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        (1i64..1_000).prop_map(TenantId::new)
    }

    /// Usernames as a client might send them: mixed case, maybe padded.
    pub fn arb_raw_username() -> impl Strategy<Value = String> {
        ("[a-zA-Z][a-zA-Z0-9_]{0,15}", " {0,2}", " {0,2}")
            .prop_map(|(name, left, right)| format!("{}{}{}", left, name, right))
    }

    pub fn arb_identity_key() -> impl Strategy<Value = IdentityKey> {
        (arb_tenant_id(), arb_raw_username())
            .prop_map(|(tenant, username)| IdentityKey::new(tenant, &username))
    }

    pub fn arb_station_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,20}"
    }

    pub fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 0..256)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;

    /// Fixed "now" used by fixtures: 2024-01-01T00:00:00Z.
    pub const NOW: i64 = 1_704_067_200;

    pub fn alice() -> IdentityKey {
        IdentityKey::new(TenantId::new(1), "alice")
    }

    pub fn bob() -> IdentityKey {
        IdentityKey::new(TenantId::new(1), "bob")
    }

    pub fn login(identity: IdentityKey) -> BrokerLogin {
        BrokerLogin::new(identity, BrokerCredential::password("secret"))
    }

    pub fn pending(station: &str, consumer: &str, owner: &str, payload: &str) -> PendingMessage {
        PendingMessage::new(station, consumer, owner, payload.as_bytes().to_vec(), NOW)
    }

    pub fn sync_event(identity: IdentityKey, expires_at: i64) -> SyncEvent {
        SyncEvent::new(identity, BrokerCredential::connection_token("tok"), expires_at)
    }
}

// ============================================================================
// TESTS
// ============================================================================
