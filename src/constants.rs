//! # System Constants
//!
//! Wire-level names shared by every orchestrator instance taking part in a
//! collaboration, plus the operational defaults the configuration layer falls
//! back to.

/// Header keys carried by every collaboration envelope
pub mod headers {
    pub const CORRELATION_ID: &str = "CorrelationID";
    pub const MESSAGE_TYPE: &str = "MessageType";
    pub const ORIGIN_INSTANCE: &str = "OriginInstance";
    pub const DESTINATION_INSTANCE: &str = "DestinationInstance";
    /// `host:port` of the broker the response has to be published to
    pub const REPLY_TO: &str = "ReplyTo";
    pub const PLAN_ID: &str = "PlanID";
}

/// Well-known broker topics
pub mod topics {
    /// Requests are published here on the origin's broker; serving peers subscribe
    pub const REQUEST_TOPIC: &str = "collaboration/request";
    /// Responses are published here on the origin's broker; only the origin subscribes
    pub const RESPONSE_TOPIC: &str = "collaboration/response";
}

/// Plan input parameters the orchestrator fills in on its own
pub mod plan_parameters {
    pub const INSTANCE_DATA_API_URL: &str = "OpenTOSCAContainerAPIServiceInstanceURL";
    pub const CORRELATION_ID: &str = "CorrelationID";
}

/// Operational defaults
pub mod system {
    pub const DEFAULT_INSTANCE_ID: &str = "localhost";
    pub const DEFAULT_BROKER_HOST: &str = "localhost";
    pub const DEFAULT_BROKER_PORT: u16 = 1883;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;
    pub const DEFAULT_MAX_RECONNECT_BACKOFF_MS: u64 = 30_000;
    pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const DEFAULT_RETENTION_SECONDS: u64 = 3_600;
    pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
    pub const DEFAULT_INSTANCE_DATA_API: &str =
        "http://localhost:1337/csars/{package}/servicetemplates/{template}/instances";
    pub const DESCRIPTOR_EXTENSION: &str = "json";
    pub const MAX_TRANSITIONS_PER_PACKAGE: usize = 256;
    pub const MAX_REMOVED_HISTORIES: usize = 1_024;
    /// Longest line accepted by the TCP broker transport
    pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
    pub const ENV_PREFIX: &str = "COLLAB";
}
