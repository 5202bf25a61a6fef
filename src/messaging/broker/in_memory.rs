//! # In-Memory Broker Network
//!
//! Process-local brokers addressed by [`BrokerEndpoint`], for tests and for
//! running several collaborating instances inside one process.
//!
//! Every published envelope goes through the JSON codec, so anything that
//! would not survive the wire does not survive here either. Brokers can be
//! taken offline or stalled to exercise connect failures and timeouts.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BrokerConnection, BrokerConnector, BrokerEndpoint, Credentials, Subscription};
use crate::messaging::envelope::Envelope;
use crate::messaging::errors::{MessagingError, MessagingResult};

/// One broker of the network
#[derive(Debug)]
pub struct InMemoryBroker {
    endpoint: BrokerEndpoint,
    required_credentials: Option<Credentials>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>>,
    online: AtomicBool,
    stalled: AtomicBool,
    published: AtomicU64,
}

impl InMemoryBroker {
    fn new(endpoint: BrokerEndpoint, required_credentials: Option<Credentials>) -> Self {
        Self {
            endpoint,
            required_credentials,
            subscribers: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
            published: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Offline brokers refuse connections and publishes; going offline closes
    /// every open subscription
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.subscribers.lock().clear();
        }
    }

    /// Stalled brokers never answer a connection attempt
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Total envelopes accepted by this broker
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let mut subscribers = self.subscribers.lock();
        match subscribers.get_mut(topic) {
            Some(senders) => {
                senders.retain(|sender| !sender.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    fn authenticate(&self, credentials: &Credentials) -> MessagingResult<()> {
        match &self.required_credentials {
            Some(required) if required != credentials => Err(MessagingError::authentication(
                &self.endpoint,
                "bad username or password",
            )),
            _ => Ok(()),
        }
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(sender);
        Subscription::new(topic, receiver)
    }

    fn publish(&self, topic: &str, envelope: &Envelope) -> MessagingResult<()> {
        if !self.is_online() {
            return Err(MessagingError::closed(&self.endpoint));
        }

        let delivered = Envelope::from_bytes(&envelope.to_bytes()?)?;
        self.published.fetch_add(1, Ordering::SeqCst);

        let mut subscribers = self.subscribers.lock();
        if let Some(senders) = subscribers.get_mut(topic) {
            senders.retain(|sender| sender.send(delivered.clone()).is_ok());
            debug!(
                broker = %self.endpoint,
                topic = %topic,
                subscribers = senders.len(),
                "Envelope delivered"
            );
        }
        Ok(())
    }
}

/// Registry of in-memory brokers; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct InMemoryBrokerNetwork {
    brokers: Arc<DashMap<BrokerEndpoint, Arc<InMemoryBroker>>>,
}

impl InMemoryBrokerNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an open broker at `endpoint`, or return the running one
    pub fn add_broker(&self, endpoint: BrokerEndpoint) -> Arc<InMemoryBroker> {
        self.brokers
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(InMemoryBroker::new(endpoint, None)))
            .clone()
    }

    /// Start a broker that only accepts `credentials`
    pub fn add_secured_broker(
        &self,
        endpoint: BrokerEndpoint,
        credentials: Credentials,
    ) -> Arc<InMemoryBroker> {
        let broker = Arc::new(InMemoryBroker::new(endpoint.clone(), Some(credentials)));
        self.brokers.insert(endpoint, broker.clone());
        broker
    }

    pub fn broker(&self, endpoint: &BrokerEndpoint) -> Option<Arc<InMemoryBroker>> {
        self.brokers.get(endpoint).map(|entry| entry.value().clone())
    }

    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            network: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    network: InMemoryBrokerNetwork,
}

#[async_trait]
impl BrokerConnector for InMemoryConnector {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        credentials: &Credentials,
    ) -> MessagingResult<Arc<dyn BrokerConnection>> {
        let broker = self
            .network
            .broker(endpoint)
            .ok_or_else(|| MessagingError::connection(endpoint, "no broker listening"))?;

        if broker.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !broker.is_online() {
            return Err(MessagingError::connection(endpoint, "connection refused"));
        }
        broker.authenticate(credentials)?;

        Ok(Arc::new(InMemoryConnection {
            endpoint: endpoint.clone(),
            broker,
        }))
    }
}

#[derive(Debug)]
struct InMemoryConnection {
    endpoint: BrokerEndpoint,
    broker: Arc<InMemoryBroker>,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.broker.is_online()
    }

    async fn publish(&self, topic: &str, envelope: &Envelope) -> MessagingResult<()> {
        self.broker.publish(topic, envelope)
    }

    async fn subscribe(&self, topic: &str) -> MessagingResult<Subscription> {
        if !self.broker.is_online() {
            return Err(MessagingError::subscribe(topic, "broker offline"));
        }
        Ok(self.broker.subscribe(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::MessageType;
    use crate::models::CorrelationId;
    use std::time::Duration;

    fn envelope(id: &str) -> Envelope {
        Envelope::headers_only(&CorrelationId::new(id), MessageType::InvocationResponse)
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_of_topic() {
        let network = InMemoryBrokerNetwork::new();
        let endpoint = BrokerEndpoint::new("broker", 1883);
        network.add_broker(endpoint.clone());

        let connection = network
            .connector()
            .connect(&endpoint, &Credentials::anonymous())
            .await
            .unwrap();
        let mut first = connection.subscribe("a").await.unwrap();
        let mut second = connection.subscribe("a").await.unwrap();
        let mut other = connection.subscribe("b").await.unwrap();

        connection.publish("a", &envelope("1")).await.unwrap();

        assert_eq!(first.recv().await.unwrap().correlation_id(), Some(CorrelationId::new("1")));
        assert_eq!(second.recv().await.unwrap().correlation_id(), Some(CorrelationId::new("1")));
        assert!(tokio::time::timeout(Duration::from_millis(20), other.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_secured_broker_rejects_bad_credentials() {
        let network = InMemoryBrokerNetwork::new();
        let endpoint = BrokerEndpoint::new("secure", 1883);
        network.add_secured_broker(endpoint.clone(), Credentials::new("admin", "secret"));
        let connector = network.connector();

        let denied = connector
            .connect(&endpoint, &Credentials::new("admin", "wrong"))
            .await;
        assert!(matches!(denied, Err(MessagingError::Authentication { .. })));

        assert!(connector
            .connect(&endpoint, &Credentials::new("admin", "secret"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_offline_broker_refuses_publish() {
        let network = InMemoryBrokerNetwork::new();
        let endpoint = BrokerEndpoint::new("flaky", 1883);
        let broker = network.add_broker(endpoint.clone());
        let connection = network
            .connector()
            .connect(&endpoint, &Credentials::anonymous())
            .await
            .unwrap();

        let mut subscription = connection.subscribe("a").await.unwrap();

        broker.set_online(false);
        assert!(!connection.is_connected());
        assert!(connection.publish("a", &envelope("1")).await.is_err());
        assert_eq!(broker.published_count(), 0);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_fails_to_connect() {
        let network = InMemoryBrokerNetwork::new();
        let result = network
            .connector()
            .connect(&BrokerEndpoint::new("nowhere", 1), &Credentials::anonymous())
            .await;
        assert!(matches!(result, Err(MessagingError::Connection { .. })));
    }
}
