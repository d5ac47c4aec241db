//! Client configuration.

use std::time::Duration;

use chatsync_core::SyncConfig;

/// Base URL of the request/response API when none is configured.
pub const DEFAULT_API_BASE: &str = "http://localhost:8080/api";

/// Timeout applied to each API request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Capacity of the channel carrying application intents.
pub const DEFAULT_INTENT_CAPACITY: usize = 64;

/// Capacity of the channel carrying transport and API results.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Capacity of each transport's outbound frame queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

/// Full configuration of a running client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Engine settings (realtime endpoint, connection lifecycle)
    pub sync: SyncConfig,
    /// Base URL of the request/response API
    pub api_base: String,
    /// Per-request timeout for the API
    pub request_timeout: Duration,
    /// Intent channel capacity
    pub intent_capacity: usize,
    /// Transport/API result channel capacity
    pub event_capacity: usize,
    /// Per-transport outbound queue capacity
    pub outbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            intent_capacity: DEFAULT_INTENT_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Default configuration for the given realtime and API endpoints.
    pub fn new(ws_endpoint: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self { sync: SyncConfig::new(ws_endpoint), api_base: api_base.into(), ..Default::default() }
    }
}
