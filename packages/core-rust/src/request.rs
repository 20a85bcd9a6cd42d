//! JMAP request and response envelopes.
//!
//! Parsing is where request-level validation happens: anything that is not a
//! well-formed batch (including a malformed `#` result reference) is rejected
//! with `notRequest` before a single method call runs.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::RequestError;
use crate::schema::JsonMap;

/// Pointer into an earlier call's response: `{"resultOf", "name", "path"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResultReference {
    pub result_of: String,
    pub name: String,
    pub path: String,
}

/// One `[name, arguments, clientId]` triple of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub name: String,
    /// Arguments with every `#`-prefixed key removed.
    pub args: JsonMap,
    pub client_id: String,
    /// `(argument name without '#', reference)` pairs, in input order.
    pub references: Vec<(String, ResultReference)>,
}

impl MethodCall {
    /// Builds a call, splitting `#`-prefixed arguments out as references.
    ///
    /// # Errors
    ///
    /// Returns `notRequest` if a reference does not decode.
    pub fn new(
        name: impl Into<String>,
        args: JsonMap,
        client_id: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let mut plain = JsonMap::new();
        let mut references = Vec::new();
        for (key, value) in args {
            match key.strip_prefix('#') {
                Some(target) => {
                    let reference: ResultReference =
                        serde_json::from_value(value).map_err(|e| {
                            RequestError::not_request(format!(
                                "invalid result reference {key:?}: {e}"
                            ))
                        })?;
                    references.push((target.to_string(), reference));
                }
                None => {
                    plain.insert(key, value);
                }
            }
        }
        Ok(Self {
            name: name.into(),
            args: plain,
            client_id: client_id.into(),
            references,
        })
    }

    fn from_triple(index: usize, raw: JsonValue) -> Result<Self, RequestError> {
        let malformed = || {
            RequestError::not_request(format!(
                "method call {index} must be [name, arguments, id]"
            ))
        };
        let JsonValue::Array(parts) = raw else {
            return Err(malformed());
        };
        let [JsonValue::String(name), JsonValue::Object(args), JsonValue::String(client_id)] =
            <[JsonValue; 3]>::try_from(parts).map_err(|_| malformed())?
        else {
            return Err(malformed());
        };
        Self::new(name, args, client_id)
    }
}

/// A parsed batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub using: Vec<String>,
    pub method_calls: Vec<MethodCall>,
}

impl Request {
    /// Parses either the full `{"using", "methodCalls"}` object or the bare
    /// list of triples some clients send.
    ///
    /// # Errors
    ///
    /// Returns `notRequest` for anything that is not a valid batch.
    pub fn from_json(raw: JsonValue) -> Result<Self, RequestError> {
        let (using, calls) = match raw {
            JsonValue::Array(calls) => (Vec::new(), calls),
            JsonValue::Object(mut body) => {
                let using = match body.remove("using") {
                    None | Some(JsonValue::Null) => Vec::new(),
                    Some(value) => serde_json::from_value::<Vec<String>>(value).map_err(|_| {
                        RequestError::not_request("using must be a list of strings")
                    })?,
                };
                let Some(JsonValue::Array(calls)) = body.remove("methodCalls") else {
                    return Err(RequestError::not_request("methodCalls must be a list"));
                };
                (using, calls)
            }
            _ => return Err(RequestError::not_request("")),
        };

        let method_calls = calls
            .into_iter()
            .enumerate()
            .map(|(i, call)| MethodCall::from_triple(i, call))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            using,
            method_calls,
        })
    }

    /// Parses a raw HTTP body.
    ///
    /// # Errors
    ///
    /// Returns `notJSON` if the body is not JSON, otherwise as
    /// [`Request::from_json`].
    pub fn from_slice(body: &[u8]) -> Result<Self, RequestError> {
        let raw: JsonValue =
            serde_json::from_slice(body).map_err(|e| RequestError::not_json(e.to_string()))?;
        Self::from_json(raw)
    }
}

/// One `[name, data, clientId]` entry of `methodResponses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry(pub String, pub JsonValue, pub String);

impl ResponseEntry {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn data(&self) -> &JsonValue {
        &self.1
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.2
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.0 == "error"
    }
}

/// The assembled batch response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub method_responses: Vec<ResponseEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,
}

impl Response {
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestErrorKind;
    use serde_json::json;

    #[test]
    fn parses_full_request_object() {
        let request = Request::from_json(json!({
            "using": ["urn:ietf:params:jmap:core"],
            "methodCalls": [["Core/echo", {"hello": true}, "c1"]],
            "createdIds": {},
        }))
        .unwrap();
        assert_eq!(request.using, vec!["urn:ietf:params:jmap:core"]);
        assert_eq!(request.method_calls.len(), 1);
        assert_eq!(request.method_calls[0].name, "Core/echo");
        assert_eq!(request.method_calls[0].client_id, "c1");
    }

    #[test]
    fn parses_bare_list() {
        let request = Request::from_json(json!([["Core/echo", {}, "0"]])).unwrap();
        assert!(request.using.is_empty());
        assert_eq!(request.method_calls[0].client_id, "0");
    }

    #[test]
    fn rejects_non_request_shapes() {
        for raw in [
            json!("hello"),
            json!(42),
            json!({"using": []}),
            json!({"methodCalls": "x"}),
            json!({"using": [1], "methodCalls": []}),
            json!([["Core/echo", {}]]),
            json!([["Core/echo", [], "c1"]]),
            json!([[1, {}, "c1"]]),
            json!([["Core/echo", {}, "c1", "extra"]]),
        ] {
            let err = Request::from_json(raw.clone()).unwrap_err();
            assert_eq!(err.kind, RequestErrorKind::NotRequest, "{raw}");
            assert_eq!(err.status, 400);
        }
    }

    #[test]
    fn bad_json_is_not_json() {
        let err = Request::from_slice(b"{not json").unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::NotJson);
    }

    #[test]
    fn references_are_split_out() {
        let request = Request::from_json(json!([[
            "Email/get",
            {
                "accountId": "a",
                "#ids": {"resultOf": "c0", "name": "Email/query", "path": "/ids"},
            },
            "c1",
        ]]))
        .unwrap();
        let call = &request.method_calls[0];
        assert!(call.args.contains_key("accountId"));
        assert!(!call.args.contains_key("#ids"));
        assert_eq!(
            call.references,
            vec![(
                "ids".to_string(),
                ResultReference {
                    result_of: "c0".to_string(),
                    name: "Email/query".to_string(),
                    path: "/ids".to_string(),
                }
            )]
        );
    }

    #[test]
    fn malformed_reference_is_not_request() {
        for reference in [
            json!({"resultOf": "c0", "name": "Email/query"}),
            json!({"resultOf": "c0", "name": "Email/query", "path": "/ids", "x": 1}),
            json!("c0"),
        ] {
            let err = Request::from_json(json!([["Email/get", {"#ids": reference}, "c1"]]))
                .unwrap_err();
            assert_eq!(err.kind, RequestErrorKind::NotRequest);
        }
    }

    #[test]
    fn response_serializes_entries_as_triples() {
        let response = Response {
            method_responses: vec![ResponseEntry(
                "Core/echo".to_string(),
                json!({"a": 1}),
                "c1".to_string(),
            )],
            session_state: None,
        };
        assert_eq!(
            response.to_json(),
            json!({"methodResponses": [["Core/echo", {"a": 1}, "c1"]]})
        );
    }
}
