//! Method dispatch: the [`Module`] trait and the standard [`MethodTable`].
//!
//! A module owns a set of method names. The executor routes each call to the
//! module that registered its name; the module validates the arguments and
//! runs the handler. [`MethodTable`] is the reusable implementation: an
//! explicit `method name → (argument schema, handler)` table built once at
//! construction, which unmarshals arguments in the client view and turns
//! validation failures into `invalidArguments`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::auth::{AccountBackend, ResourceIds};
use crate::context::RequestContext;
use crate::error::MethodError;
use crate::marshal::Marshaller;
use crate::record::{Record, RecordError};
use crate::schema::{Schema, View};
use crate::value::Value;

// ---------------------------------------------------------------------------
// MethodOutput / ModuleError
// ---------------------------------------------------------------------------

/// What a handler returns.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodOutput {
    /// A typed response, marshaled by the executor in the server view.
    Record(Record),
    /// Pre-built response JSON, passed through untouched.
    Json(JsonValue),
}

impl From<Record> for MethodOutput {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<JsonValue> for MethodOutput {
    fn from(json: JsonValue) -> Self {
        Self::Json(json)
    }
}

/// Failure of a module call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModuleError {
    /// The module (or its backend) does not implement the method. Reported as
    /// `unknownMethod`.
    #[error("method not implemented")]
    NotImplemented,
    #[error(transparent)]
    Method(#[from] MethodError),
}

/// A handler addressed a field its response schema does not have.
impl From<RecordError> for ModuleError {
    fn from(err: RecordError) -> Self {
        Self::Method(MethodError::server_fail(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Module trait
// ---------------------------------------------------------------------------

/// A set of JMAP methods.
pub trait Module: Send + Sync {
    /// Short name used in logs (e.g. `"core"`, `"mail"`).
    fn name(&self) -> &str;

    /// Method names this module answers.
    fn methods(&self) -> BTreeSet<String>;

    /// Runs `method` with raw (reference-resolved) arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotImplemented`] for methods the module cannot
    /// serve, or a [`MethodError`] for a failed call.
    fn execute(
        &self,
        method: &str,
        args: JsonValue,
        ctx: &RequestContext,
    ) -> Result<MethodOutput, ModuleError>;
}

// ---------------------------------------------------------------------------
// MethodTable
// ---------------------------------------------------------------------------

/// Handler for a method with schema-validated arguments.
pub type TypedHandler =
    Arc<dyn Fn(&RequestContext, Record) -> Result<MethodOutput, ModuleError> + Send + Sync>;

/// Handler receiving the raw argument JSON.
pub type RawHandler =
    Arc<dyn Fn(&RequestContext, JsonValue) -> Result<MethodOutput, ModuleError> + Send + Sync>;

/// How a method's arguments are read.
#[derive(Clone)]
pub enum ArgsSpec {
    /// Passed through unchanged.
    Raw(RawHandler),
    /// Unmarshaled with the client view of the schema.
    Typed(Arc<Schema>, TypedHandler),
}

enum Route {
    Spec(ArgsSpec),
    Alias(String),
}

/// Registration table implementing [`Module`].
pub struct MethodTable {
    name: String,
    marshaller: Marshaller,
    routes: BTreeMap<String, Route>,
}

impl MethodTable {
    pub fn new(name: impl Into<String>, marshaller: Marshaller) -> Self {
        Self {
            name: name.into(),
            marshaller,
            routes: BTreeMap::new(),
        }
    }

    /// Registers a method whose arguments are unmarshaled into `schema`.
    #[must_use]
    pub fn typed<F>(self, method: impl Into<String>, schema: &Arc<Schema>, handler: F) -> Self
    where
        F: Fn(&RequestContext, Record) -> Result<MethodOutput, ModuleError> + Send + Sync + 'static,
    {
        self.typed_handler(method, schema, Arc::new(handler))
    }

    /// Like [`MethodTable::typed`] for an already-boxed handler, such as one
    /// wrapped by [`read_guard`].
    #[must_use]
    pub fn typed_handler(
        mut self,
        method: impl Into<String>,
        schema: &Arc<Schema>,
        handler: TypedHandler,
    ) -> Self {
        self.routes.insert(
            method.into(),
            Route::Spec(ArgsSpec::Typed(Arc::clone(schema), handler)),
        );
        self
    }

    /// Registers a method that receives its arguments untouched.
    #[must_use]
    pub fn raw<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&RequestContext, JsonValue) -> Result<MethodOutput, ModuleError> + Send + Sync + 'static,
    {
        self.routes
            .insert(method.into(), Route::Spec(ArgsSpec::Raw(Arc::new(handler))));
        self
    }

    /// Makes `alias` an additional name for `target`.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.routes.insert(alias.into(), Route::Alias(target.into()));
        self
    }

    /// The argument handling registered for `method`, following aliases.
    #[must_use]
    pub fn spec(&self, method: &str) -> Option<&ArgsSpec> {
        match self.routes.get(method)? {
            Route::Spec(spec) => Some(spec),
            Route::Alias(target) => match self.routes.get(target)? {
                Route::Spec(spec) => Some(spec),
                Route::Alias(_) => None,
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn marshaller(&self) -> &Marshaller {
        &self.marshaller
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("name", &self.name)
            .field("methods", &self.routes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Module for MethodTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn methods(&self) -> BTreeSet<String> {
        self.routes.keys().cloned().collect()
    }

    fn execute(
        &self,
        method: &str,
        args: JsonValue,
        ctx: &RequestContext,
    ) -> Result<MethodOutput, ModuleError> {
        match self.spec(method).ok_or(ModuleError::NotImplemented)? {
            ArgsSpec::Raw(handler) => handler(ctx, args),
            ArgsSpec::Typed(schema, handler) => {
                if !args.is_object() {
                    return Err(MethodError::invalid_arguments("arguments must be an object").into());
                }
                let record = self
                    .marshaller
                    .unmarshal(schema, View::Client, &args)
                    .map_err(|e| MethodError::invalid_arguments(e.to_string()))?;
                handler(ctx, record)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Permission decorator
// ---------------------------------------------------------------------------

/// Wraps a `/get`-style handler with read checks.
///
/// Before `handler` runs, the principal must be able to read the `Account`
/// named by `accountId` and, when `ids` is set, every id of `resource_type`.
/// Denial is reported as `forbidden`.
pub fn read_guard(
    auth: Arc<dyn AccountBackend>,
    resource_type: impl Into<String>,
    handler: TypedHandler,
) -> TypedHandler {
    let resource_type = resource_type.into();
    Arc::new(move |ctx: &RequestContext, args: Record| -> Result<MethodOutput, ModuleError> {
        check_read(auth.as_ref(), &resource_type, ctx, &args)?;
        handler(ctx, args)
    })
}

fn check_read(
    auth: &dyn AccountBackend,
    resource_type: &str,
    ctx: &RequestContext,
    args: &Record,
) -> Result<(), MethodError> {
    let account_id = args.str("account_id").unwrap_or_default();
    if !auth.can_read(ctx, "Account", ResourceIds::One(account_id)) {
        return Err(MethodError::forbidden(format!(
            "cannot read account {account_id}"
        )));
    }
    if let Some(ids) = args.get("ids").and_then(Value::as_list) {
        let ids: Vec<&str> = ids.iter().filter_map(Value::as_str).collect();
        if !auth.can_read(ctx, resource_type, ResourceIds::Many(&ids)) {
            return Err(MethodError::forbidden(format!(
                "cannot read requested {resource_type} objects"
            )));
        }
    }
    Ok(())
}
