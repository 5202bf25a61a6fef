//! # Collaboration Bus
//!
//! Routes invocation requests between collaborating orchestrator instances
//! and correlates their responses back to the waiting caller.
//!
//! ## Topology
//!
//! ```text
//!   instance A (origin)                          instance B (executes for A)
//!   ───────────────────                          ───────────────────────────
//!   send_request ──publish──► A's broker ◄──subscribe── request listener (B lists A as peer)
//!                             collaboration/request            │
//!                                                              ▼ handler on its own task
//!   response listener ◄──subscribe── A's broker ◄──publish── response to ReplyTo
//!        │                    collaboration/response
//!        ▼
//!   CorrelationRegistry::resolve
//! ```
//!
//! Every instance publishes its requests to its *own* broker; instances that
//! serve it subscribe there. Each request carries a `ReplyTo` header naming the
//! origin's broker, so the executing instance knows where to answer.
//!
//! Transport failures never escape the bus except as the result of
//! [`CollaborationBus::send_request`]; listener problems are logged and
//! reflected in the [`BusStartReport`]. A listener whose subscription closes
//! resubscribes with exponential backoff and keeps running until shutdown.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broker::{BrokerConnection, BrokerConnector, BrokerEndpoint, Subscription};
use super::envelope::{Envelope, EnvelopeBody};
use super::errors::MessagingResult;
use super::outbound::{connect_with_timeout, OutboundChannel};
use crate::config::{CollaborationConfig, InstanceConfig};
use crate::constants::topics::{REQUEST_TOPIC, RESPONSE_TOPIC};
use crate::logging::log_bus_event;
use crate::models::{InstanceId, InvocationRequest, InvocationResponse};
use crate::registry::{CorrelationRegistry, ResolveOutcome};

/// Local execution path for requests received from peers
#[async_trait]
pub trait InboundRequestHandler: Send + Sync + 'static {
    /// Execute `request` on this instance; the response must carry the
    /// request's correlation id
    async fn handle_request(&self, request: InvocationRequest) -> InvocationResponse;
}

/// What [`CollaborationBus::start`] managed to bring up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStartReport {
    pub collaboration_enabled: bool,
    pub response_listener: bool,
    /// Peers whose request topic is being served
    pub request_listeners: Vec<BrokerEndpoint>,
    /// Peers that could not be connected, with the reason
    pub failed_peers: Vec<(BrokerEndpoint, String)>,
    /// Set when the peer configuration is unusable; no request listener runs then
    pub configuration_error: Option<String>,
}

pub struct CollaborationBus {
    instance_id: InstanceId,
    local_broker: BrokerEndpoint,
    collaboration: CollaborationConfig,
    connector: Arc<dyn BrokerConnector>,
    outbound: Arc<OutboundChannel>,
    correlations: Arc<CorrelationRegistry>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CollaborationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationBus")
            .field("instance_id", &self.instance_id)
            .field("local_broker", &self.local_broker)
            .field("enabled", &self.collaboration.enabled)
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

impl CollaborationBus {
    pub fn new(
        instance: &InstanceConfig,
        collaboration: &CollaborationConfig,
        connector: Arc<dyn BrokerConnector>,
        correlations: Arc<CorrelationRegistry>,
    ) -> Self {
        let outbound = Arc::new(OutboundChannel::new(
            Arc::clone(&connector),
            collaboration.credentials(),
            collaboration.connect_timeout(),
        ));

        Self {
            instance_id: instance.instance_id(),
            local_broker: instance.broker_endpoint(),
            collaboration: collaboration.clone(),
            connector,
            outbound,
            correlations,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn local_broker(&self) -> &BrokerEndpoint {
        &self.local_broker
    }

    pub fn is_enabled(&self) -> bool {
        self.collaboration.enabled
    }

    /// Whether a request for `target` is executed on this instance
    pub fn is_local(&self, target: &InstanceId) -> bool {
        !self.collaboration.enabled || target == &self.instance_id
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Start the response listener and one request listener per peer
    pub async fn start(&self, handler: Arc<dyn InboundRequestHandler>) -> BusStartReport {
        let mut report = BusStartReport::default();

        if !self.collaboration.enabled {
            info!(instance_id = %self.instance_id, "Collaboration disabled, running local-only");
            return report;
        }
        report.collaboration_enabled = true;

        let responses = self.target(self.local_broker.clone(), RESPONSE_TOPIC);
        match responses.open().await {
            Ok((connection, subscription)) => {
                let handle = tokio::spawn(run_response_listener(
                    self.instance_id.clone(),
                    responses,
                    connection,
                    subscription,
                    Arc::clone(&self.correlations),
                ));
                self.listeners.lock().push(handle);
                report.response_listener = true;
            }
            Err(e) => {
                error!(
                    broker = %self.local_broker,
                    error = %e,
                    "Unable to start response listener on local broker"
                );
            }
        }

        let peers = match self.collaboration.peer_endpoints() {
            Ok(peers) => peers,
            Err(e) => {
                error!(error = %e, "Invalid collaboration peer configuration, no request listeners started");
                report.configuration_error = Some(e.to_string());
                return report;
            }
        };

        if peers.is_empty() {
            info!(instance_id = %self.instance_id, "No collaboration peers configured, acting as master");
        }

        // Connect to all peers at once so one slow peer only costs a single timeout
        let attempts = join_all(peers.into_iter().map(|peer| async move {
            let requests = self.target(peer.clone(), REQUEST_TOPIC);
            let result = requests.open().await;
            (peer, requests, result)
        }))
        .await;

        for (peer, requests, result) in attempts {
            match result {
                Ok((connection, subscription)) => {
                    let handle = tokio::spawn(run_request_listener(
                        self.instance_id.clone(),
                        requests,
                        connection,
                        subscription,
                        Arc::clone(&handler),
                        Arc::clone(&self.outbound),
                    ));
                    self.listeners.lock().push(handle);
                    info!(peer = %peer, "Serving collaboration requests of peer");
                    report.request_listeners.push(peer);
                }
                Err(e) => {
                    error!(peer = %peer, error = %e, "Skipping unreachable collaboration peer");
                    report.failed_peers.push((peer, e.to_string()));
                }
            }
        }

        report
    }

    fn target(&self, endpoint: BrokerEndpoint, topic: &'static str) -> SubscriptionTarget {
        SubscriptionTarget {
            connector: Arc::clone(&self.connector),
            endpoint,
            topic,
            collaboration: self.collaboration.clone(),
        }
    }

    /// Publish a request for a remote instance to this instance's broker
    pub async fn send_request(&self, request: InvocationRequest) -> MessagingResult<()> {
        let correlation_id = request.correlation_id.clone();
        let envelope = Envelope::request(request, &self.instance_id, &self.local_broker);

        match self
            .outbound
            .publish(&self.local_broker, REQUEST_TOPIC, &envelope)
            .await
        {
            Ok(()) => {
                log_bus_event(
                    "request_sent",
                    Some(correlation_id.as_str()),
                    Some("InvocationRequest"),
                    Some(self.local_broker.to_string().as_str()),
                    envelope.destination().as_ref().map(InstanceId::as_str),
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    broker = %self.local_broker,
                    error = %e,
                    "Unable to publish collaboration request"
                );
                Err(e)
            }
        }
    }

    /// Stop every listener; pending invocations stay in the registry
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.listeners.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        self.outbound.close().await;
        info!(instance_id = %self.instance_id, listeners = handles.len(), "Collaboration bus stopped");
    }
}

impl Drop for CollaborationBus {
    fn drop(&mut self) {
        for handle in self.listeners.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Broker topic a listener is subscribed to, and how to get it back
#[derive(Debug, Clone)]
struct SubscriptionTarget {
    connector: Arc<dyn BrokerConnector>,
    endpoint: BrokerEndpoint,
    topic: &'static str,
    collaboration: CollaborationConfig,
}

impl SubscriptionTarget {
    /// Connect and subscribe; the connection has to outlive the subscription
    async fn open(&self) -> MessagingResult<(Arc<dyn BrokerConnection>, Subscription)> {
        let connection = connect_with_timeout(
            self.connector.as_ref(),
            &self.endpoint,
            &self.collaboration.credentials(),
            self.collaboration.connect_timeout(),
        )
        .await?;
        let subscription = connection.subscribe(self.topic).await?;
        Ok((connection, subscription))
    }

    /// Resubscribe with exponential backoff until the broker accepts again
    async fn reopen(&self) -> (Arc<dyn BrokerConnection>, Subscription) {
        let mut attempt: u32 = 0;
        loop {
            let delay = self.collaboration.reconnect_delay(attempt);
            tokio::time::sleep(delay).await;
            match self.open().await {
                Ok(opened) => {
                    info!(
                        broker = %self.endpoint,
                        topic = self.topic,
                        attempts = attempt + 1,
                        "Subscription re-established"
                    );
                    return opened;
                }
                Err(e) => {
                    warn!(
                        broker = %self.endpoint,
                        topic = self.topic,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Resubscription failed"
                    );
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

async fn run_response_listener(
    instance_id: InstanceId,
    target: SubscriptionTarget,
    mut connection: Arc<dyn BrokerConnection>,
    mut subscription: Subscription,
    correlations: Arc<CorrelationRegistry>,
) {
    loop {
        while let Some(envelope) = subscription.recv().await {
            handle_response(&instance_id, envelope, &correlations);
        }
        warn!(broker = %connection.endpoint(), "Response subscription closed, resubscribing");
        (connection, subscription) = target.reopen().await;
    }
}

fn handle_response(instance_id: &InstanceId, envelope: Envelope, correlations: &CorrelationRegistry) {
    if envelope
        .destination()
        .is_some_and(|destination| &destination != instance_id)
    {
        debug!(destination = ?envelope.destination(), "Ignoring response addressed to another instance");
        return;
    }

    let response = match envelope.into_body() {
        Some(EnvelopeBody::InvocationResponse(response)) => response,
        _ => {
            warn!("Ignoring message without response body on response topic");
            return;
        }
    };

    let correlation_id = response.correlation_id.clone();
    let outcome = correlations.resolve(response);
    log_bus_event(
        "response_received",
        Some(correlation_id.as_str()),
        Some("InvocationResponse"),
        None,
        Some(match outcome {
            ResolveOutcome::Completed => "completed",
            ResolveOutcome::Progress => "progress",
            ResolveOutcome::Stale => "stale",
        }),
    );
}

async fn run_request_listener(
    instance_id: InstanceId,
    target: SubscriptionTarget,
    mut connection: Arc<dyn BrokerConnection>,
    mut subscription: Subscription,
    handler: Arc<dyn InboundRequestHandler>,
    outbound: Arc<OutboundChannel>,
) {
    loop {
        while let Some(envelope) = subscription.recv().await {
            accept_request(&instance_id, connection.endpoint(), envelope, &handler, &outbound);
        }
        warn!(peer = %connection.endpoint(), "Request subscription closed, resubscribing");
        (connection, subscription) = target.reopen().await;
    }
}

/// Validate a request envelope and answer it on its own task
fn accept_request(
    instance_id: &InstanceId,
    peer: &BrokerEndpoint,
    envelope: Envelope,
    handler: &Arc<dyn InboundRequestHandler>,
    outbound: &Arc<OutboundChannel>,
) {
    if envelope.destination().as_ref() != Some(instance_id) {
        debug!(
            peer = %peer,
            destination = ?envelope.destination(),
            "Ignoring request addressed to another instance"
        );
        return;
    }

    let reply_to = match envelope.reply_to() {
        Ok(reply_to) => reply_to,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Dropping request without usable ReplyTo");
            return;
        }
    };

    let request = match envelope.body() {
        Some(EnvelopeBody::InvocationRequest(request)) => request.clone(),
        _ => {
            warn!(peer = %peer, "Ignoring message without request body on request topic");
            return;
        }
    };

    log_bus_event(
        "request_received",
        Some(request.correlation_id.as_str()),
        Some("InvocationRequest"),
        Some(peer.to_string().as_str()),
        None,
    );

    tokio::spawn(answer_request(
        instance_id.clone(),
        envelope,
        request,
        reply_to,
        Arc::clone(handler),
        Arc::clone(outbound),
    ));
}

async fn answer_request(
    instance_id: InstanceId,
    request_envelope: Envelope,
    request: InvocationRequest,
    reply_to: BrokerEndpoint,
    handler: Arc<dyn InboundRequestHandler>,
    outbound: Arc<OutboundChannel>,
) {
    let correlation_id = request.correlation_id.clone();
    let mut response = handler.handle_request(request).await;
    if response.correlation_id != correlation_id {
        warn!(
            expected = %correlation_id,
            actual = %response.correlation_id,
            "Handler answered with a different correlation id, restoring it"
        );
        response.correlation_id = correlation_id.clone();
    }

    let envelope = Envelope::response(response, &instance_id, &request_envelope);
    match outbound.publish(&reply_to, RESPONSE_TOPIC, &envelope).await {
        Ok(()) => log_bus_event(
            "response_sent",
            Some(correlation_id.as_str()),
            Some("InvocationResponse"),
            Some(reply_to.to_string().as_str()),
            None,
        ),
        Err(e) => error!(
            correlation_id = %correlation_id,
            reply_to = %reply_to,
            error = %e,
            "Unable to publish collaboration response"
        ),
    }
}
