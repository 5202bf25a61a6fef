//! # Collaboration Messaging
//!
//! Envelope codec, broker abstraction and the collaboration bus that carries
//! invocation requests and responses between orchestrator instances.
//!
//! ## Components
//!
//! - **envelope**: immutable header map plus typed body, JSON on the wire
//! - **broker**: [`BrokerConnector`]/[`BrokerConnection`] traits with in-memory
//!   and TCP implementations
//! - **outbound**: one shared, lazily connected, serialized outbound channel
//! - **bus**: listeners per peer, request routing and response correlation

pub mod broker;
pub mod bus;
pub mod envelope;
pub mod errors;
pub mod outbound;

pub use broker::{
    BrokerConnection, BrokerConnector, BrokerEndpoint, Credentials, InMemoryBroker,
    InMemoryBrokerNetwork, InMemoryConnector, Subscription, TcpBrokerConnector, TcpBrokerServer,
};
pub use bus::{BusStartReport, CollaborationBus, InboundRequestHandler};
pub use envelope::{Envelope, EnvelopeBody, MessageType};
pub use errors::{MessagingError, MessagingResult};
pub use outbound::OutboundChannel;
