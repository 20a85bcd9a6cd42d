//! JMAP error taxonomy.
//!
//! Two disjoint families, matching RFC 8620 section 3.6:
//!
//! - **Request-level** errors ([`RequestError`]) reject the whole batch before
//!   any method call runs. They replace the response body entirely.
//! - **Method-level** errors ([`MethodError`]) are scoped to one call and are
//!   recorded as an `"error"` entry in `methodResponses`; the batch continues.

use std::fmt;

use serde_json::{json, Map, Value as JsonValue};

/// URN prefix shared by every request-level error `type`.
pub const REQUEST_ERROR_PREFIX: &str = "urn:ietf:params:jmap:error:";

// ---------------------------------------------------------------------------
// Request-level errors
// ---------------------------------------------------------------------------

/// Kind of a request-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestErrorKind {
    /// The body parsed as JSON but is not a valid Request object.
    NotRequest,
    /// The body is not valid I-JSON.
    NotJson,
    /// The request exceeds a server limit (see `RequestError::limit`).
    Limit,
    /// The `using` list names a capability the server does not support.
    UnknownCapability,
}

impl RequestErrorKind {
    /// Wire identifier, without the URN prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRequest => "notRequest",
            Self::NotJson => "notJSON",
            Self::Limit => "limit",
            Self::UnknownCapability => "unknownCapability",
        }
    }

    /// HTTP status code sent with this error.
    #[must_use]
    pub fn status(self) -> u16 {
        match self {
            Self::NotRequest | Self::NotJson | Self::Limit | Self::UnknownCapability => 400,
        }
    }

    fn default_detail(self) -> &'static str {
        match self {
            Self::NotRequest => "This was not a valid request structure",
            Self::NotJson => "The request body was not valid JSON",
            Self::Limit => "The request exceeds a server limit",
            Self::UnknownCapability => "The request uses an unsupported capability",
        }
    }
}

impl fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request-level error. Aborts the entire batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct RequestError {
    pub kind: RequestErrorKind,
    pub status: u16,
    pub detail: String,
    /// Name of the exceeded limit, only for [`RequestErrorKind::Limit`].
    pub limit: Option<String>,
}

impl RequestError {
    /// Creates an error with the kind's status code and the given detail.
    pub fn new(kind: RequestErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            kind,
            status: kind.status(),
            detail: if detail.is_empty() {
                kind.default_detail().to_string()
            } else {
                detail
            },
            limit: None,
        }
    }

    pub fn not_request(detail: impl Into<String>) -> Self {
        Self::new(RequestErrorKind::NotRequest, detail)
    }

    pub fn not_json(detail: impl Into<String>) -> Self {
        Self::new(RequestErrorKind::NotJson, detail)
    }

    pub fn unknown_capability(detail: impl Into<String>) -> Self {
        Self::new(RequestErrorKind::UnknownCapability, detail)
    }

    /// A `limit` error naming the exceeded limit (e.g. `maxCallsInRequest`).
    pub fn limit(limit: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            limit: Some(limit.into()),
            ..Self::new(RequestErrorKind::Limit, detail)
        }
    }

    /// Full URN `type` of this error.
    #[must_use]
    pub fn type_uri(&self) -> String {
        format!("{REQUEST_ERROR_PREFIX}{}", self.kind.as_str())
    }

    /// Problem-details JSON body for this error.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut body = json!({
            "type": self.type_uri(),
            "status": self.status,
            "detail": self.detail,
        });
        if let (Some(limit), Some(obj)) = (&self.limit, body.as_object_mut()) {
            obj.insert("limit".to_string(), JsonValue::String(limit.clone()));
        }
        body
    }
}

// ---------------------------------------------------------------------------
// Method-level errors
// ---------------------------------------------------------------------------

/// Kind of a method-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodErrorKind {
    InvalidArguments,
    UnsupportedFilter,
    UnsupportedSort,
    AnchorNotFound,
    AccountNotFound,
    InvalidResultReference,
    CannotCalculateChanges,
    UnknownMethod,
    StateMismatch,
    Forbidden,
    ServerFail,
}

impl MethodErrorKind {
    /// Wire identifier used as the error's `type`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArguments => "invalidArguments",
            Self::UnsupportedFilter => "unsupportedFilter",
            Self::UnsupportedSort => "unsupportedSort",
            Self::AnchorNotFound => "anchorNotFound",
            Self::AccountNotFound => "accountNotFound",
            Self::InvalidResultReference => "invalidResultReference",
            Self::CannotCalculateChanges => "cannotCalculateChanges",
            Self::UnknownMethod => "unknownMethod",
            Self::StateMismatch => "stateMismatch",
            Self::Forbidden => "forbidden",
            Self::ServerFail => "serverFail",
        }
    }
}

impl fmt::Display for MethodErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method-level error, recorded as one `"error"` response entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct MethodError {
    pub kind: MethodErrorKind,
    pub description: Option<String>,
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl MethodError {
    #[must_use]
    pub fn new(kind: MethodErrorKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    pub fn with_description(kind: MethodErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: Some(description.into()),
        }
    }

    pub fn invalid_arguments(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::InvalidArguments, description)
    }

    pub fn unsupported_filter(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::UnsupportedFilter, description)
    }

    pub fn unsupported_sort(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::UnsupportedSort, description)
    }

    pub fn anchor_not_found(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::AnchorNotFound, description)
    }

    pub fn account_not_found(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::AccountNotFound, description)
    }

    pub fn invalid_result_reference(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::InvalidResultReference, description)
    }

    pub fn cannot_calculate_changes(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::CannotCalculateChanges, description)
    }

    pub fn unknown_method(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::UnknownMethod, description)
    }

    pub fn state_mismatch(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::StateMismatch, description)
    }

    pub fn forbidden(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::Forbidden, description)
    }

    pub fn server_fail(description: impl Into<String>) -> Self {
        Self::with_description(MethodErrorKind::ServerFail, description)
    }

    /// Response data for the `"error"` entry. An empty description is omitted.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut body = Map::new();
        body.insert(
            "type".to_string(),
            JsonValue::String(self.kind.as_str().to_string()),
        );
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            body.insert(
                "description".to_string(),
                JsonValue::String(description.to_string()),
            );
        }
        JsonValue::Object(body)
    }
}

// ---------------------------------------------------------------------------
// JmapError
// ---------------------------------------------------------------------------

/// Either family of JMAP error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JmapError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Method(#[from] MethodError),
}

impl JmapError {
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Request(err) => err.to_json(),
            Self::Method(err) => err.to_json(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_request_uses_urn_type_and_400() {
        let err = RequestError::not_request("");
        assert_eq!(
            err.to_json(),
            json!({
                "type": "urn:ietf:params:jmap:error:notRequest",
                "status": 400,
                "detail": "This was not a valid request structure",
            })
        );
    }

    #[test]
    fn limit_error_carries_limit_name() {
        let err = RequestError::limit("maxCallsInRequest", "too many calls");
        let body = err.to_json();
        assert_eq!(body["type"], "urn:ietf:params:jmap:error:limit");
        assert_eq!(body["limit"], "maxCallsInRequest");
        assert_eq!(body["detail"], "too many calls");
    }

    #[test]
    fn method_error_omits_missing_description() {
        let err = MethodError::new(MethodErrorKind::UnknownMethod);
        assert_eq!(err.to_json(), json!({"type": "unknownMethod"}));
    }

    #[test]
    fn method_error_omits_empty_description() {
        let err = MethodError::invalid_arguments("");
        assert_eq!(err.to_json(), json!({"type": "invalidArguments"}));
    }

    #[test]
    fn method_error_includes_description() {
        let err = MethodError::invalid_result_reference("no call c9");
        assert_eq!(
            err.to_json(),
            json!({"type": "invalidResultReference", "description": "no call c9"})
        );
        assert_eq!(err.to_string(), "invalidResultReference: no call c9");
    }

    #[test]
    fn method_kinds_have_fixed_identifiers() {
        let kinds = [
            (MethodErrorKind::InvalidArguments, "invalidArguments"),
            (MethodErrorKind::UnsupportedFilter, "unsupportedFilter"),
            (MethodErrorKind::InvalidResultReference, "invalidResultReference"),
            (MethodErrorKind::CannotCalculateChanges, "cannotCalculateChanges"),
            (MethodErrorKind::UnknownMethod, "unknownMethod"),
        ];
        for (kind, wire) in kinds {
            assert_eq!(kind.as_str(), wire);
        }
    }

    #[test]
    fn jmap_error_dispatches_to_json() {
        let err: JmapError = MethodError::forbidden("nope").into();
        assert_eq!(err.to_json()["type"], "forbidden");
        let err: JmapError = RequestError::not_json("bad").into();
        assert_eq!(err.to_json()["status"], 400);
    }
}
