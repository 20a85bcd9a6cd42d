//! JMAP core: schema registry, marshaling engine, method dispatch and the
//! batch executor, plus the core and mail models.

pub mod auth;
pub mod case;
pub mod context;
pub mod error;
pub mod executor;
pub mod marshal;
pub mod models;
pub mod module;
pub mod modules;
pub mod pointer;
pub mod record;
pub mod registry;
pub mod request;
pub mod schema;
pub mod value;

pub use auth::{AccountBackend, ResourceIds, StaticAccounts};
pub use context::{Principal, RequestContext};
pub use error::{JmapError, MethodError, MethodErrorKind, RequestError, RequestErrorKind};
pub use executor::{Executor, ExecutorConfig};
pub use marshal::{Marshaller, MarshalError, ValidationError};
pub use module::{MethodOutput, MethodTable, Module, ModuleError};
pub use record::Record;
pub use registry::SchemaRegistry;
pub use request::{Request, Response, ResponseEntry};
pub use schema::{Field, FieldType, Schema, View};
pub use value::Value;
