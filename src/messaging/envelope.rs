//! # Collaboration Envelope
//!
//! The unit of transport between orchestrator instances: a string header map
//! plus an optional body carrying either an invocation request or a response.
//!
//! Envelopes are immutable once built. Every constructor fills in the
//! `CorrelationID` and `MessageType` headers and [`Envelope::validate`] is run
//! on every decoded envelope, so a well-formed header set is guaranteed on both
//! ends of the wire.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "headers": {"CorrelationID": "...", "MessageType": "InvocationRequest"},
//!   "body": {"type": "InvocationRequest", "data": {"package_id": "...", "...": "..."}}
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::broker::BrokerEndpoint;
use super::errors::{MessagingError, MessagingResult};
use crate::constants::headers;
use crate::models::{CorrelationId, InstanceId, InvocationRequest, InvocationResponse};

/// Kind of message carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    InvocationRequest,
    InvocationResponse,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvocationRequest => "InvocationRequest",
            Self::InvocationResponse => "InvocationResponse",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InvocationRequest" => Ok(Self::InvocationRequest),
            "InvocationResponse" => Ok(Self::InvocationResponse),
            other => Err(MessagingError::invalid_envelope(format!(
                "unknown message type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EnvelopeBody {
    InvocationRequest(InvocationRequest),
    InvocationResponse(InvocationResponse),
}

impl EnvelopeBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::InvocationRequest(_) => MessageType::InvocationRequest,
            Self::InvocationResponse(_) => MessageType::InvocationResponse,
        }
    }

    fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::InvocationRequest(request) => &request.correlation_id,
            Self::InvocationResponse(response) => &response.correlation_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<EnvelopeBody>,
}

impl Envelope {
    /// Request envelope addressed to the request's target instance.
    ///
    /// `reply_to` is the broker of the origin; the executing peer publishes the
    /// response to its response topic.
    pub fn request(
        request: InvocationRequest,
        origin: &InstanceId,
        reply_to: &BrokerEndpoint,
    ) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            headers::CORRELATION_ID.to_string(),
            request.correlation_id.to_string(),
        );
        entries.insert(
            headers::MESSAGE_TYPE.to_string(),
            MessageType::InvocationRequest.to_string(),
        );
        entries.insert(headers::ORIGIN_INSTANCE.to_string(), origin.to_string());
        entries.insert(
            headers::DESTINATION_INSTANCE.to_string(),
            request.target_instance.to_string(),
        );
        entries.insert(headers::REPLY_TO.to_string(), reply_to.to_string());
        entries.insert(headers::PLAN_ID.to_string(), request.plan.to_string());

        Self {
            headers: entries,
            body: Some(EnvelopeBody::InvocationRequest(request)),
        }
    }

    /// Response envelope answering `request`, addressed back to their origin
    pub fn response(response: InvocationResponse, responder: &InstanceId, request: &Envelope) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            headers::CORRELATION_ID.to_string(),
            response.correlation_id.to_string(),
        );
        entries.insert(
            headers::MESSAGE_TYPE.to_string(),
            MessageType::InvocationResponse.to_string(),
        );
        entries.insert(headers::ORIGIN_INSTANCE.to_string(), responder.to_string());
        if let Some(origin) = request.header(headers::ORIGIN_INSTANCE) {
            entries.insert(headers::DESTINATION_INSTANCE.to_string(), origin.to_string());
        }

        Self {
            headers: entries,
            body: Some(EnvelopeBody::InvocationResponse(response)),
        }
    }

    /// Envelope with a header set only, e.g. for control messages
    pub fn headers_only(correlation_id: &CorrelationId, message_type: MessageType) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(headers::CORRELATION_ID.to_string(), correlation_id.to_string());
        entries.insert(headers::MESSAGE_TYPE.to_string(), message_type.to_string());
        Self {
            headers: entries,
            body: None,
        }
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> Option<&EnvelopeBody> {
        self.body.as_ref()
    }

    pub fn into_body(self) -> Option<EnvelopeBody> {
        self.body
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.header(headers::CORRELATION_ID).map(CorrelationId::from)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.header(headers::MESSAGE_TYPE)
            .and_then(|value| value.parse().ok())
    }

    pub fn origin(&self) -> Option<InstanceId> {
        self.header(headers::ORIGIN_INSTANCE).map(InstanceId::from)
    }

    pub fn destination(&self) -> Option<InstanceId> {
        self.header(headers::DESTINATION_INSTANCE).map(InstanceId::from)
    }

    /// Broker the response to this envelope has to be published to
    pub fn reply_to(&self) -> MessagingResult<BrokerEndpoint> {
        self.header(headers::REPLY_TO)
            .ok_or_else(|| MessagingError::invalid_envelope("missing ReplyTo header"))?
            .parse()
    }

    /// Check the mandatory headers and their agreement with the body
    pub fn validate(&self) -> MessagingResult<()> {
        let correlation_id = self.header(headers::CORRELATION_ID).ok_or_else(|| {
            MessagingError::invalid_envelope("missing CorrelationID header")
        })?;
        if correlation_id.is_empty() {
            return Err(MessagingError::invalid_envelope("empty CorrelationID header"));
        }

        let message_type: MessageType = self
            .header(headers::MESSAGE_TYPE)
            .ok_or_else(|| MessagingError::invalid_envelope("missing MessageType header"))?
            .parse()?;

        if let Some(body) = &self.body {
            if body.message_type() != message_type {
                return Err(MessagingError::invalid_envelope(format!(
                    "MessageType header {message_type} does not match {} body",
                    body.message_type()
                )));
            }
            if body.correlation_id().as_str() != correlation_id {
                return Err(MessagingError::invalid_envelope(format!(
                    "CorrelationID header {correlation_id} does not match body {}",
                    body.correlation_id()
                )));
            }
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MessagingError::serialization(e.to_string()))
    }

    /// Decode and validate an envelope received from the wire
    pub fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::deserialization(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParameterBinding, PackageId, QualifiedName};

    fn request() -> InvocationRequest {
        InvocationRequest {
            package_id: PackageId::new("shop.csar"),
            target_instance: InstanceId::new("edge-1"),
            template_id: QualifiedName::new("http://example.org", "Shop"),
            plan: QualifiedName::new("http://example.org/plans", "Shop_scale"),
            service_instance_id: 7,
            inputs: vec![ParameterBinding::new("replicas", "3")],
            correlation_id: CorrelationId::new("corr-1"),
        }
    }

    #[test]
    fn test_request_envelope_carries_routing_headers() {
        let envelope = Envelope::request(
            request(),
            &InstanceId::new("cloud"),
            &BrokerEndpoint::new("cloud-broker", 1883),
        );

        assert!(envelope.validate().is_ok());
        assert_eq!(envelope.header(headers::CORRELATION_ID), Some("corr-1"));
        assert_eq!(envelope.message_type(), Some(MessageType::InvocationRequest));
        assert_eq!(envelope.destination(), Some(InstanceId::new("edge-1")));
        assert_eq!(
            envelope.reply_to().unwrap(),
            BrokerEndpoint::new("cloud-broker", 1883)
        );
    }

    #[test]
    fn test_response_copies_correlation_id_and_addresses_origin() {
        let request_envelope = Envelope::request(
            request(),
            &InstanceId::new("cloud"),
            &BrokerEndpoint::new("cloud-broker", 1883),
        );
        let response = Envelope::response(
            InvocationResponse::completed(CorrelationId::new("corr-1"), Vec::new()),
            &InstanceId::new("edge-1"),
            &request_envelope,
        );

        assert!(response.validate().is_ok());
        assert_eq!(response.correlation_id(), request_envelope.correlation_id());
        assert_eq!(response.destination(), Some(InstanceId::new("cloud")));
    }

    #[test]
    fn test_wire_shape_uses_tagged_body() {
        let envelope = Envelope::request(
            request(),
            &InstanceId::new("cloud"),
            &BrokerEndpoint::new("cloud-broker", 1883),
        );
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(json["headers"]["MessageType"], "InvocationRequest");
        assert_eq!(json["body"]["type"], "InvocationRequest");
        assert_eq!(json["body"]["data"]["service_instance_id"], 7);
    }

    #[test]
    fn test_decoding_rejects_missing_headers() {
        let raw = br#"{"headers": {"MessageType": "InvocationRequest"}}"#;
        assert!(matches!(
            Envelope::from_bytes(raw),
            Err(MessagingError::InvalidEnvelope { .. })
        ));
    }

    #[test]
    fn test_decoding_rejects_mismatched_body() {
        let raw = br#"{
            "headers": {"CorrelationID": "a", "MessageType": "InvocationRequest"},
            "body": {"type": "InvocationResponse", "data": {"correlation_id": "a", "completed": true}}
        }"#;
        assert!(Envelope::from_bytes(raw).is_err());

        let headers_only = br#"{"headers": {"CorrelationID": "a", "MessageType": "InvocationResponse"}}"#;
        assert!(Envelope::from_bytes(headers_only).is_ok());
    }
}
