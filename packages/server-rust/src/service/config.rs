//! Server-level configuration for the JMAP service.

use std::path::PathBuf;

use jmap_core::executor::DEFAULT_MAX_CALLS_IN_REQUEST;

use crate::network::DEFAULT_MAX_BODY_BYTES;

/// Identity, limits and data source of the single served account.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Username every request is attributed to.
    pub username: String,
    /// Id of the mail account.
    pub account_id: String,
    /// Display name of the mail account.
    pub account_name: String,
    /// Fixture file to seed the store from. `None` loads the built-in sample.
    pub fixture: Option<PathBuf>,
    /// Prefix for the URLs advertised in the session resource.
    pub public_url: String,
    /// Advertised and enforced `maxCallsInRequest`.
    pub max_calls_in_request: usize,
    /// Advertised `maxSizeRequest`.
    pub max_size_request: usize,
    /// Advertised `maxConcurrentRequests`.
    pub max_concurrent_requests: usize,
    /// Advertised `maxObjectsInGet`.
    pub max_objects_in_get: usize,
    /// Advertised `maxObjectsInSet`.
    pub max_objects_in_set: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            username: "user@example.com".to_string(),
            account_id: "a1".to_string(),
            account_name: "user@example.com".to_string(),
            fixture: None,
            public_url: String::new(),
            max_calls_in_request: DEFAULT_MAX_CALLS_IN_REQUEST,
            max_size_request: DEFAULT_MAX_BODY_BYTES,
            max_concurrent_requests: 4,
            max_objects_in_get: 500,
            max_objects_in_set: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ServerConfig::default();
        assert_eq!(config.account_id, "a1");
        assert!(config.fixture.is_none());
        assert_eq!(config.max_calls_in_request, 16);
        assert_eq!(config.max_size_request, 10_000_000);
        assert_eq!(config.max_objects_in_get, 500);
    }
}
