//! Shared outbound channel of the collaboration bus.
//!
//! Connections are opened lazily per broker and cached. Sends to the same
//! broker are serialized through that broker's own async mutex, so a slow or
//! unreachable broker never holds up sends to the others. A connection whose
//! publish failed is dropped from the cache so the next send reconnects.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::broker::{BrokerConnection, BrokerConnector, BrokerEndpoint, Credentials};
use super::envelope::Envelope;
use super::errors::{MessagingError, MessagingResult};

/// Connect to `endpoint`, failing with a timeout error after `timeout`
pub async fn connect_with_timeout(
    connector: &dyn BrokerConnector,
    endpoint: &BrokerEndpoint,
    credentials: &Credentials,
    timeout: Duration,
) -> MessagingResult<Arc<dyn BrokerConnection>> {
    tokio::time::timeout(timeout, connector.connect(endpoint, credentials))
        .await
        .map_err(|_| {
            MessagingError::timeout(
                format!("connect to {endpoint}"),
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )
        })?
}

pub struct OutboundChannel {
    connector: Arc<dyn BrokerConnector>,
    credentials: Credentials,
    connect_timeout: Duration,
    slots: DashMap<BrokerEndpoint, Arc<ConnectionSlot>>,
}

type ConnectionSlot = Mutex<Option<Arc<dyn BrokerConnection>>>;

impl fmt::Debug for OutboundChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundChannel")
            .field("connector", &self.connector)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl OutboundChannel {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        credentials: Credentials,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            credentials,
            connect_timeout,
            slots: DashMap::new(),
        }
    }

    /// Publish `envelope` to `topic` on the broker at `endpoint`
    pub async fn publish(
        &self,
        endpoint: &BrokerEndpoint,
        topic: &str,
        envelope: &Envelope,
    ) -> MessagingResult<()> {
        // Clone the slot out so no map shard stays locked across an await
        let slot = Arc::clone(self.slots.entry(endpoint.clone()).or_default().value());
        let mut cached = slot.lock().await;

        let connection = match cached.as_ref() {
            Some(connection) if connection.is_connected() => Arc::clone(connection),
            _ => {
                *cached = None;
                debug!(endpoint = %endpoint, "Opening outbound broker connection");
                let connection = connect_with_timeout(
                    self.connector.as_ref(),
                    endpoint,
                    &self.credentials,
                    self.connect_timeout,
                )
                .await?;
                *cached = Some(Arc::clone(&connection));
                connection
            }
        };

        if let Err(e) = connection.publish(topic, envelope).await {
            warn!(endpoint = %endpoint, topic = %topic, error = %e, "Publish failed, dropping cached connection");
            *cached = None;
            return Err(e);
        }
        Ok(())
    }

    pub async fn cached_connections(&self) -> usize {
        let slots: Vec<_> = self.slots.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn close(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::broker::InMemoryBrokerNetwork;
    use crate::messaging::envelope::MessageType;
    use crate::models::CorrelationId;

    fn envelope() -> Envelope {
        Envelope::headers_only(&CorrelationId::new("out-1"), MessageType::InvocationResponse)
    }

    #[tokio::test]
    async fn test_connection_is_cached_and_reopened_after_failure() {
        let network = InMemoryBrokerNetwork::new();
        let endpoint = BrokerEndpoint::new("peer", 1883);
        let broker = network.add_broker(endpoint.clone());
        let channel = OutboundChannel::new(
            Arc::new(network.connector()),
            Credentials::anonymous(),
            Duration::from_secs(1),
        );

        channel.publish(&endpoint, "t", &envelope()).await.unwrap();
        channel.publish(&endpoint, "t", &envelope()).await.unwrap();
        assert_eq!(channel.cached_connections().await, 1);
        assert_eq!(broker.published_count(), 2);

        broker.set_online(false);
        assert!(channel.publish(&endpoint, "t", &envelope()).await.is_err());
        assert_eq!(channel.cached_connections().await, 0);

        broker.set_online(true);
        channel.publish(&endpoint, "t", &envelope()).await.unwrap();
        assert_eq!(broker.published_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_broker_times_out() {
        let network = InMemoryBrokerNetwork::new();
        let endpoint = BrokerEndpoint::new("stalled", 1883);
        network.add_broker(endpoint.clone()).set_stalled(true);
        let channel = OutboundChannel::new(
            Arc::new(network.connector()),
            Credentials::anonymous(),
            Duration::from_millis(500),
        );

        let result = channel.publish(&endpoint, "t", &envelope()).await;
        assert!(matches!(result, Err(MessagingError::Timeout { timeout_ms: 500, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_broker_does_not_block_other_brokers() {
        let network = InMemoryBrokerNetwork::new();
        let stalled = BrokerEndpoint::new("stalled", 1883);
        let healthy = BrokerEndpoint::new("healthy", 1884);
        network.add_broker(stalled.clone()).set_stalled(true);
        let broker = network.add_broker(healthy.clone());
        let channel = Arc::new(OutboundChannel::new(
            Arc::new(network.connector()),
            Credentials::anonymous(),
            Duration::from_secs(5),
        ));

        let blocked = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.publish(&stalled, "t", &envelope()).await }
        });
        tokio::task::yield_now().await;

        tokio::time::timeout(
            Duration::from_millis(100),
            channel.publish(&healthy, "t", &envelope()),
        )
        .await
        .expect("healthy broker reached while another connect is pending")
        .unwrap();
        assert_eq!(broker.published_count(), 1);
        assert!(!blocked.is_finished());

        assert!(matches!(
            blocked.await.unwrap(),
            Err(MessagingError::Timeout { .. })
        ));
    }
}
