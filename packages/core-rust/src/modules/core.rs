//! The `Core` capability's methods.

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use crate::context::RequestContext;
use crate::marshal::Marshaller;
use crate::module::{MethodOutput, MethodTable, Module, ModuleError};

/// Serves `Core/echo`, which returns its arguments unchanged.
#[derive(Debug)]
pub struct CoreModule {
    table: MethodTable,
}

impl CoreModule {
    #[must_use]
    pub fn new(marshaller: Marshaller) -> Self {
        let table = MethodTable::new("core", marshaller)
            .raw("Core/echo", |_ctx, args| Ok(MethodOutput::Json(args)));
        Self { table }
    }
}

impl Module for CoreModule {
    fn name(&self) -> &str {
        self.table.name()
    }

    fn methods(&self) -> BTreeSet<String> {
        self.table.methods()
    }

    fn execute(
        &self,
        method: &str,
        args: JsonValue,
        ctx: &RequestContext,
    ) -> Result<MethodOutput, ModuleError> {
        self.table.execute(method, args, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn module() -> CoreModule {
        CoreModule::new(Marshaller::new(Arc::new(SchemaRegistry::new())))
    }

    #[test]
    fn echo_returns_arguments() {
        let args = json!({"hello": true, "nested": [1, 2, {"a": null}]});
        let out = module()
            .execute("Core/echo", args.clone(), &RequestContext::default())
            .unwrap();
        assert_eq!(out, MethodOutput::Json(args));
    }

    #[test]
    fn echo_accepts_non_object_arguments() {
        let out = module()
            .execute("Core/echo", json!([1, 2]), &RequestContext::default())
            .unwrap();
        assert_eq!(out, MethodOutput::Json(json!([1, 2])));
    }

    #[test]
    fn only_echo_is_registered() {
        let m = module();
        assert_eq!(m.name(), "core");
        assert_eq!(m.methods().into_iter().collect::<Vec<_>>(), vec!["Core/echo"]);
    }
}
