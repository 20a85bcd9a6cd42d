use serde::{Deserialize, Serialize};

/// Authenticated identity making a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Login name; also the key used to look up accounts.
    pub username: String,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Per-request context carrying identity and tracing information.
/// Threaded through the executor into every module call for auth and audit.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Correlation identifier for logs (the HTTP `x-request-id` when served).
    pub request_id: String,
    /// Authenticated principal, if the request is authenticated.
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            principal: None,
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.username.as_str())
    }
}
