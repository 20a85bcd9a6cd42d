//! Batch execution.
//!
//! ```text
//! Parse -> [for each call: ResolveRefs -> Dispatch -> RecordResult] -> Assemble
//! ```
//!
//! Calls run strictly in order. A failing call yields one `"error"` entry and
//! the batch continues; only request-level errors (raised before any call
//! runs) abort the whole batch. The per-batch response table lives on the
//! stack of [`Executor::execute`], so an `Executor` carries no state between
//! batches and can be shared freely.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::{debug, info_span, warn};

use crate::context::RequestContext;
use crate::error::{MethodError, RequestError};
use crate::marshal::Marshaller;
use crate::module::{MethodOutput, Module, ModuleError};
use crate::pointer;
use crate::request::{MethodCall, Request, ResponseEntry, Response, ResultReference};
use crate::schema::View;

/// Default for [`ExecutorConfig::max_calls_in_request`].
pub const DEFAULT_MAX_CALLS_IN_REQUEST: usize = 16;

/// Limits and capability checks applied before a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Batches with more calls are rejected with a `limit` error.
    pub max_calls_in_request: usize,
    /// Capabilities a request may list in `using`. `None` accepts any.
    pub capabilities: Option<BTreeSet<String>>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_calls_in_request: DEFAULT_MAX_CALLS_IN_REQUEST,
            capabilities: None,
        }
    }
}

/// Responses recorded so far in one batch: `client_id → name → data`.
type ResponseTable = HashMap<String, HashMap<String, JsonValue>>;

/// Runs batches against a fixed set of modules.
pub struct Executor {
    methods: HashMap<String, Arc<dyn Module>>,
    marshaller: Marshaller,
    config: ExecutorConfig,
}

impl Executor {
    /// Indexes every method of every module. When two modules register the
    /// same method name, the later module wins.
    #[must_use]
    pub fn new(modules: Vec<Arc<dyn Module>>, marshaller: Marshaller, config: ExecutorConfig) -> Self {
        let mut methods: HashMap<String, Arc<dyn Module>> = HashMap::new();
        for module in modules {
            for method in module.methods() {
                if let Some(previous) = methods.insert(method.clone(), Arc::clone(&module)) {
                    warn!(
                        method = %method,
                        previous = previous.name(),
                        module = module.name(),
                        "method registered by more than one module"
                    );
                }
            }
        }
        Self {
            methods,
            marshaller,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Names of every dispatchable method.
    #[must_use]
    pub fn methods(&self) -> BTreeSet<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    /// Parses and runs a raw HTTP body.
    ///
    /// # Errors
    ///
    /// Returns a request-level error if the body is not JSON, not a batch, or
    /// violates a limit.
    pub fn handle_slice(&self, body: &[u8], ctx: &RequestContext) -> Result<Response, RequestError> {
        self.execute(Request::from_slice(body)?, ctx)
    }

    /// Parses and runs an already-decoded JSON body.
    ///
    /// # Errors
    ///
    /// As [`Executor::handle_slice`], minus the JSON syntax check.
    pub fn handle_json(&self, body: JsonValue, ctx: &RequestContext) -> Result<Response, RequestError> {
        self.execute(Request::from_json(body)?, ctx)
    }

    /// Runs a parsed batch.
    ///
    /// # Errors
    ///
    /// Returns `limit` or `unknownCapability` before any call runs. Method
    /// failures never surface here; they become `"error"` entries.
    pub fn execute(&self, request: Request, ctx: &RequestContext) -> Result<Response, RequestError> {
        self.check_request(&request)?;

        let mut responses = ResponseTable::new();
        let mut method_responses = Vec::with_capacity(request.method_calls.len());

        for call in request.method_calls {
            let span = info_span!(
                "method_call",
                method = %call.name,
                call_id = %call.client_id,
                request_id = %ctx.request_id,
                outcome = tracing::field::Empty,
                duration_ms = tracing::field::Empty,
            );
            let _entered = span.enter();
            let start = Instant::now();

            let client_id = call.client_id.clone();
            let (name, data) = match self.execute_call(call, &responses, ctx) {
                Ok((name, data)) => {
                    span.record("outcome", "ok");
                    debug!("method call succeeded");
                    (name, data)
                }
                Err(err) => {
                    span.record("outcome", err.kind.as_str());
                    warn!(error = %err, "method call failed");
                    ("error".to_string(), err.to_json())
                }
            };

            #[allow(clippy::cast_possible_truncation)]
            span.record("duration_ms", start.elapsed().as_millis() as u64);

            responses
                .entry(client_id.clone())
                .or_default()
                .insert(name.clone(), data.clone());
            method_responses.push(ResponseEntry(name, data, client_id));
        }

        Ok(Response {
            method_responses,
            session_state: None,
        })
    }

    fn check_request(&self, request: &Request) -> Result<(), RequestError> {
        let calls = request.method_calls.len();
        if calls > self.config.max_calls_in_request {
            return Err(RequestError::limit(
                "maxCallsInRequest",
                format!(
                    "request has {calls} method calls, the limit is {}",
                    self.config.max_calls_in_request
                ),
            ));
        }
        if let Some(supported) = &self.config.capabilities {
            if let Some(unknown) = request.using.iter().find(|c| !supported.contains(*c)) {
                return Err(RequestError::unknown_capability(format!(
                    "unsupported capability {unknown}"
                )));
            }
        }
        Ok(())
    }

    /// Runs one call, returning the response name and serialized data.
    fn execute_call(
        &self,
        call: MethodCall,
        responses: &ResponseTable,
        ctx: &RequestContext,
    ) -> Result<(String, JsonValue), MethodError> {
        let MethodCall {
            name,
            mut args,
            references,
            ..
        } = call;

        let module = self.methods.get(&name).ok_or_else(|| {
            MethodError::unknown_method(format!("unknown method {name}"))
        })?;

        for (target, reference) in &references {
            if args.contains_key(target) {
                return Err(MethodError::invalid_arguments(format!(
                    "argument {target} given both directly and as a result reference"
                )));
            }
            let value = resolve_reference(reference, responses)?;
            args.insert(target.clone(), value);
        }

        let output = match module.execute(&name, JsonValue::Object(args), ctx) {
            Ok(output) => output,
            Err(ModuleError::NotImplemented) => {
                return Err(MethodError::unknown_method("This method is not implemented."));
            }
            Err(ModuleError::Method(err)) => return Err(err),
        };

        let data = match output {
            MethodOutput::Json(json) => json,
            MethodOutput::Record(record) => self
                .marshaller
                .marshal(&record, View::Server)
                .map_err(|e| MethodError::server_fail(format!("cannot encode response: {e}")))?,
        };
        Ok((name, data))
    }
}

fn resolve_reference(
    reference: &ResultReference,
    responses: &ResponseTable,
) -> Result<JsonValue, MethodError> {
    let by_name = responses.get(&reference.result_of).ok_or_else(|| {
        MethodError::invalid_result_reference(format!(
            "no previous method call with id {}",
            reference.result_of
        ))
    })?;
    let data = by_name.get(&reference.name).ok_or_else(|| {
        let mut names: Vec<&str> = by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        MethodError::invalid_result_reference(format!(
            "previous method call with id {} has no response named {}, possible names are: {}",
            reference.result_of,
            reference.name,
            names.join(", ")
        ))
    })?;
    pointer::resolve(data, &reference.path)
        .map_err(|e| MethodError::invalid_result_reference(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
