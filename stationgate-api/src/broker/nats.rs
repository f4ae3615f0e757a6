//! NATS JetStream broker backend.
//!
//! - Each station is a JetStream stream of the same name.
//! - A producer handle is the stream's publish subject, resolved from stream
//!   info on first use and cached per (station, producer name).
//! - Each consumer group is a durable pull consumer with explicit ack.
//! - The control plane uses core NATS publish/subscribe on the root
//!   connection.

use crate::config::BrokerConfig;
use async_nats::connection::State;
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy};
use async_nats::{ClientError, ConnectErrorKind, ConnectOptions, Event, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use stationgate_core::{
    BrokerConnection, BrokerConnector, BrokerCredential, BrokerError, BrokerLogin, BrokerResult,
    ControlPlane, FetchRequest, FetchedMessage, MessageAcker, OutboundMessage, DEFAULT_TENANT_ID,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Extra time granted to a fetch beyond its own `expires` before the call is
/// abandoned locally.
const FETCH_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// CONNECT
// ============================================================================

/// Broker username for an identity. Non-default accounts are addressed as
/// `user$account`.
fn broker_user(login: &BrokerLogin) -> String {
    let tenant = login.identity.tenant_id();
    if tenant == DEFAULT_TENANT_ID {
        login.identity.username().to_string()
    } else {
        format!("{}${}", login.identity.username(), tenant)
    }
}

/// Whether a client has given up for good. A client that is only
/// reconnecting is still live.
#[derive(Debug, Clone, Default)]
struct Liveness {
    terminated: Arc<AtomicBool>,
}

impl Liveness {
    fn observe(&self, event: &Event) {
        if is_terminal(event) {
            self.terminated.store(true, Ordering::SeqCst);
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

fn is_terminal(event: &Event) -> bool {
    matches!(event, Event::Closed | Event::ClientError(ClientError::MaxReconnects))
}

fn connect_options(
    config: &BrokerConfig,
    login: &BrokerLogin,
    liveness: &Liveness,
) -> ConnectOptions {
    let user = broker_user(login);
    let options = match &login.credential {
        BrokerCredential::Password(_) => {
            ConnectOptions::new().user_and_password(user, login.credential.expose().to_string())
        }
        BrokerCredential::ConnectionToken(_) => ConnectOptions::new()
            .token(format!("{}::{}", user, login.credential.expose())),
    };

    let reconnect_wait = config.reconnect_wait;
    let mut options = options
        .name(format!("{}:{}", config.client_name, login.identity))
        .max_reconnects(config.max_reconnects)
        .reconnect_delay_callback(move |_attempts| reconnect_wait);

    let identity = login.identity.to_string();
    let liveness = liveness.clone();
    options = options.event_callback(move |event| {
        let identity = identity.clone();
        let liveness = liveness.clone();
        async move {
            match &event {
                Event::Connected => {
                    tracing::debug!(identity = %identity, "Broker connection restored")
                }
                Event::Disconnected => {
                    tracing::warn!(identity = %identity, "Broker connection lost, reconnecting")
                }
                _ if is_terminal(&event) => {
                    tracing::warn!(identity = %identity, event = ?event, "Broker connection gave up")
                }
                _ => {}
            }
            liveness.observe(&event);
        }
    });

    if let (Some(cert), Some(key)) = (&config.tls_cert, &config.tls_key) {
        options = options.add_client_certificate(cert.clone(), key.clone());
    }
    if let Some(ca) = &config.tls_ca {
        options = options.add_root_certificates(ca.clone()).require_tls(true);
    }
    options
}

async fn connect_client(
    config: &BrokerConfig,
    login: &BrokerLogin,
    liveness: &Liveness,
) -> BrokerResult<async_nats::Client> {
    connect_options(config, login, liveness)
        .connect(config.host.as_str())
        .await
        .map_err(|e| match e.kind() {
            ConnectErrorKind::AuthorizationViolation | ConnectErrorKind::Authentication => {
                BrokerError::Authentication {
                    reason: e.to_string(),
                }
            }
            ConnectErrorKind::TimedOut => BrokerError::Timeout {
                operation: format!("connect {}", config.host),
            },
            _ => BrokerError::classify("", &e.to_string()),
        })
}

/// Opens one NATS client per identity.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    config: BrokerConfig,
}

impl NatsConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConnector for NatsConnector {
    async fn connect(&self, login: &BrokerLogin) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let liveness = Liveness::default();
        let client = connect_client(&self.config, login, &liveness).await?;
        tracing::debug!(identity = %login.identity, host = %self.config.host, "Broker connection opened");
        Ok(Arc::new(NatsConnection::new(client, liveness)))
    }
}

// ============================================================================
// DATA PLANE
// ============================================================================

pub struct NatsConnection {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    /// (station, producer name) -> publish subject
    producers: Mutex<HashMap<(String, String), String>>,
    closed: AtomicBool,
    liveness: Liveness,
}

impl NatsConnection {
    fn new(client: async_nats::Client, liveness: Liveness) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            producers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            liveness,
        }
    }

    fn cached_subject(&self, station: &str, producer_name: &str) -> Option<String> {
        self.producers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(station.to_string(), producer_name.to_string()))
            .cloned()
    }

    async fn resolve_subject(&self, station: &str, producer_name: &str) -> BrokerResult<String> {
        if let Some(subject) = self.cached_subject(station, producer_name) {
            return Ok(subject);
        }

        let stream = self
            .jetstream
            .get_stream(station)
            .await
            .map_err(|e| BrokerError::classify(station, &e.to_string()))?;
        let subject = stream
            .cached_info()
            .config
            .subjects
            .iter()
            .find(|s| !s.contains('*') && !s.contains('>'))
            .cloned()
            .unwrap_or_else(|| station.to_string());

        self.producers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((station.to_string(), producer_name.to_string()), subject.clone());
        Ok(subject)
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BrokerError::Disconnected)
        }
    }
}

fn to_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }
    map
}

fn from_header_map(headers: Option<&HeaderMap>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(headers) = headers {
        for (name, values) in headers.iter() {
            if let Some(value) = values.first() {
                map.insert(name.to_string(), value.as_str().to_string());
            }
        }
    }
    map
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl MessageAcker for NatsAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::classify("", &e.to_string()))
    }
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    /// False only once closed locally or after the client stopped
    /// reconnecting; a reconnect in progress keeps the connection cached.
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.liveness.is_terminated()
    }

    async fn produce(
        &self,
        station: &str,
        producer_name: &str,
        message: &OutboundMessage,
    ) -> BrokerResult<()> {
        self.ensure_open()?;
        let subject = self.resolve_subject(station, producer_name).await?;

        let ack = self
            .jetstream
            .publish_with_headers(
                subject,
                to_header_map(&message.headers),
                Bytes::from(message.payload.clone()),
            )
            .await
            .map_err(|e| BrokerError::classify(station, &e.to_string()))?;
        ack.await
            .map_err(|e| BrokerError::classify(station, &e.to_string()))?;
        Ok(())
    }

    async fn invalidate_producer(&self, station: &str, producer_name: &str) {
        self.producers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(station.to_string(), producer_name.to_string()));
    }

    async fn fetch(&self, request: &FetchRequest) -> BrokerResult<Vec<FetchedMessage>> {
        self.ensure_open()?;
        let station = request.station.as_str();

        let stream = self
            .jetstream
            .get_stream(station)
            .await
            .map_err(|e| BrokerError::classify(station, &e.to_string()))?;
        let consumer = stream
            .get_or_create_consumer(
                &request.consumer_group,
                pull::Config {
                    durable_name: Some(request.consumer_group.clone()),
                    ack_policy: AckPolicy::Explicit,
                    max_deliver: i64::from(request.max_deliveries),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::classify(station, &e.to_string()))?;

        let collect = async {
            let mut batch = consumer
                .batch()
                .max_messages(request.batch_size)
                .expires(request.max_wait)
                .messages()
                .await
                .map_err(|e| BrokerError::classify(station, &e.to_string()))?;

            let mut fetched = Vec::with_capacity(request.batch_size);
            while let Some(next) = batch.next().await {
                match next {
                    Ok(message) => {
                        let payload = message.payload.to_vec();
                        let headers = from_header_map(message.headers.as_ref());
                        fetched.push(FetchedMessage::new(
                            payload,
                            headers,
                            Box::new(NatsAcker { message }),
                        ));
                    }
                    Err(e) => {
                        let error = BrokerError::classify(station, &e.to_string());
                        if fetched.is_empty() && !error.is_timeout() {
                            return Err(error);
                        }
                        break;
                    }
                }
            }
            Ok(fetched)
        };

        tokio::time::timeout(request.max_wait + FETCH_GRACE, collect)
            .await
            .map_err(|_| BrokerError::Timeout {
                operation: format!("fetch {}", station),
            })?
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The socket is released once the last client handle drops.
        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::Transport {
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// CONTROL PLANE
// ============================================================================

/// Core NATS publish/subscribe on the gateway's root connection.
#[derive(Clone)]
pub struct NatsControlPlane {
    client: async_nats::Client,
}

impl NatsControlPlane {
    pub async fn connect(config: &BrokerConfig, login: &BrokerLogin) -> BrokerResult<Self> {
        let client = connect_client(config, login, &Liveness::default()).await?;
        tracing::info!(host = %config.host, "Control-plane connection established");
        Ok(Self { client })
    }
}

#[async_trait]
impl ControlPlane for NatsControlPlane {
    fn is_connected(&self) -> bool {
        self.client.connection_state() == State::Connected
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BrokerResult<()> {
        self.client
            .publish(subject.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| BrokerError::classify("", &e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> BrokerResult<BoxStream<'static, Vec<u8>>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BrokerError::classify("", &e.to_string()))?;
        Ok(subscriber.map(|message| message.payload.to_vec()).boxed())
    }
}
