//! The mail capability's methods, served by a pluggable [`MailBackend`].

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::auth::AccountBackend;
use crate::context::RequestContext;
use crate::marshal::Marshaller;
use crate::models::mail::MailSchemas;
use crate::module::{read_guard, MethodOutput, MethodTable, Module, ModuleError, TypedHandler};
use crate::record::Record;

/// Storage behind the mail methods.
///
/// Each method receives the validated argument record and returns the
/// response record. Unimplemented methods answer `unknownMethod`.
pub trait MailBackend: Send + Sync + 'static {
    fn mailbox_get(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }

    fn mailbox_changes(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }

    fn mailbox_query(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }

    fn mailbox_set(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }

    fn email_get(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }

    fn email_query(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }

    fn email_set(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }

    fn thread_get(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }

    fn thread_changes(&self, _ctx: &RequestContext, _args: &Record) -> Result<Record, ModuleError> {
        Err(ModuleError::NotImplemented)
    }
}

type BackendCall<B> = fn(&B, &RequestContext, &Record) -> Result<Record, ModuleError>;

fn bind<B: MailBackend>(backend: &Arc<B>, call: BackendCall<B>) -> TypedHandler {
    let backend = Arc::clone(backend);
    Arc::new(
        move |ctx: &RequestContext, args: Record| -> Result<MethodOutput, ModuleError> {
            call(backend.as_ref(), ctx, &args).map(MethodOutput::Record)
        },
    )
}

/// `Mailbox/*`, `Email/*` and `Thread/*`.
pub struct MailModule<B: MailBackend> {
    table: MethodTable,
    backend: Arc<B>,
}

impl<B: MailBackend> MailModule<B> {
    /// Builds the method table. With `auth`, the `/get` methods are wrapped
    /// by [`read_guard`].
    #[must_use]
    pub fn new(
        marshaller: Marshaller,
        schemas: &MailSchemas,
        backend: Arc<B>,
        auth: Option<Arc<dyn AccountBackend>>,
    ) -> Self {
        let guard = |resource_type: &str, handler: TypedHandler| match &auth {
            Some(auth) => read_guard(Arc::clone(auth), resource_type, handler),
            None => handler,
        };

        let table = MethodTable::new("mail", marshaller)
            .typed_handler(
                "Mailbox/get",
                &schemas.mailbox_get_args,
                guard("Mailbox", bind(&backend, B::mailbox_get)),
            )
            .typed_handler(
                "Mailbox/changes",
                &schemas.mailbox_changes_args,
                bind(&backend, B::mailbox_changes),
            )
            .typed_handler(
                "Mailbox/query",
                &schemas.mailbox_query_args,
                bind(&backend, B::mailbox_query),
            )
            .typed_handler(
                "Mailbox/set",
                &schemas.mailbox_set_args,
                bind(&backend, B::mailbox_set),
            )
            .typed_handler(
                "Email/get",
                &schemas.email_get_args,
                guard("Email", bind(&backend, B::email_get)),
            )
            .typed_handler(
                "Email/query",
                &schemas.email_query_args,
                bind(&backend, B::email_query),
            )
            .typed_handler(
                "Email/set",
                &schemas.email_set_args,
                bind(&backend, B::email_set),
            )
            .typed_handler(
                "Thread/get",
                &schemas.thread_get_args,
                guard("Thread", bind(&backend, B::thread_get)),
            )
            .typed_handler(
                "Thread/changes",
                &schemas.thread_changes_args,
                bind(&backend, B::thread_changes),
            )
            .alias("getMailboxes", "Mailbox/get");

        Self { table, backend }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<B: MailBackend> Module for MailModule<B> {
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
    use crate::auth::StaticAccounts;
    use crate::context::Principal;
    use crate::error::{MethodError, MethodErrorKind};
    use crate::models::{CoreSchemas, HeaderSchemas};
    use crate::registry::SchemaRegistry;
    use crate::value::Value;
    use serde_json::json;

    struct OneMailbox {
        schemas: MailSchemas,
    }

    impl MailBackend for OneMailbox {
        fn mailbox_get(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
            let inbox = Record::new(&self.schemas.mailbox)
                .with("id", "m1")?
                .with("name", "Inbox")?
                .with("role", "inbox")?;
            Ok(Record::new(&self.schemas.mailbox_get_response)
                .with("account_id", args.str("account_id").unwrap_or_default())?
                .with("state", "1")?
                .with("list", vec![Value::Record(inbox)])?)
        }
    }

    fn module(with_auth: bool) -> MailModule<OneMailbox> {
        let core = CoreSchemas::new().unwrap();
        let headers = HeaderSchemas::new().unwrap();
        let mail = MailSchemas::new(&core, &headers).unwrap();
        let mut registry = SchemaRegistry::new();
        core.register(&mut registry).unwrap();
        mail.register(&mut registry).unwrap();

        let auth: Option<Arc<dyn AccountBackend>> = with_auth.then(|| {
            let account = Record::new(&core.account)
                .with("name", "alice@example.com")
                .unwrap();
            Arc::new(StaticAccounts::new().with_account("alice", "a1", account))
                as Arc<dyn AccountBackend>
        });
        let backend = Arc::new(OneMailbox {
            schemas: mail.clone(),
        });
        MailModule::new(Marshaller::new(Arc::new(registry)), &mail, backend, auth)
    }

    fn alice() -> RequestContext {
        RequestContext::new("r1").with_principal(Principal::new("alice"))
    }

    fn expect_kind(err: ModuleError, kind: MethodErrorKind) {
        match err {
            ModuleError::Method(MethodError { kind: got, .. }) => assert_eq!(got, kind),
            other => panic!("expected {kind:?}, got {other:?}"),
        }
    }

    #[test]
    fn registers_every_mail_method() {
        let methods = module(false).methods();
        for name in [
            "Mailbox/get",
            "Mailbox/changes",
            "Mailbox/query",
            "Mailbox/set",
            "Email/get",
            "Email/query",
            "Email/set",
            "Thread/get",
            "Thread/changes",
            "getMailboxes",
        ] {
            assert!(methods.contains(name), "{name} missing");
        }
    }

    #[test]
    fn mailbox_get_reaches_backend() {
        let out = module(false)
            .execute("Mailbox/get", json!({"accountId": "a1"}), &alice())
            .unwrap();
        let MethodOutput::Record(response) = out else {
            panic!("expected record output");
        };
        assert_eq!(response.str("account_id"), Some("a1"));
        assert_eq!(response.list("list").map(<[Value]>::len), Some(1));
    }

    #[test]
    fn legacy_alias_routes_to_mailbox_get() {
        let out = module(false)
            .execute("getMailboxes", json!({"accountId": "a1"}), &alice())
            .unwrap();
        assert!(matches!(out, MethodOutput::Record(_)));
    }

    #[test]
    fn unimplemented_backend_methods() {
        let err = module(false)
            .execute("Email/query", json!({"accountId": "a1"}), &alice())
            .unwrap_err();
        assert_eq!(err, ModuleError::NotImplemented);
    }

    #[test]
    fn bad_arguments_never_reach_backend() {
        let err = module(false)
            .execute("Mailbox/get", json!({"accountId": "a1", "bogus": 1}), &alice())
            .unwrap_err();
        expect_kind(err, MethodErrorKind::InvalidArguments);
    }

    #[test]
    fn properties_use_wire_names() {
        let m = module(false);
        assert!(m
            .execute(
                "Mailbox/get",
                json!({"accountId": "a1", "properties": ["sortOrder"]}),
                &alice(),
            )
            .is_ok());

        let err = m
            .execute(
                "Mailbox/get",
                json!({"accountId": "a1", "properties": ["sort_order"]}),
                &alice(),
            )
            .unwrap_err();
        expect_kind(err, MethodErrorKind::InvalidArguments);
    }

    #[test]
    fn guarded_get_checks_account() {
        let m = module(true);
        assert!(m
            .execute("Mailbox/get", json!({"accountId": "a1"}), &alice())
            .is_ok());

        let err = m
            .execute("Mailbox/get", json!({"accountId": "a9"}), &alice())
            .unwrap_err();
        expect_kind(err, MethodErrorKind::Forbidden);

        let err = m
            .execute("Mailbox/get", json!({"accountId": "a1"}), &RequestContext::new("r2"))
            .unwrap_err();
        expect_kind(err, MethodErrorKind::Forbidden);
    }

    #[test]
    fn unguarded_methods_skip_auth() {
        let err = module(true)
            .execute(
                "Mailbox/changes",
                json!({"accountId": "a9", "sinceState": "1"}),
                &RequestContext::new("r2"),
            )
            .unwrap_err();
        assert_eq!(err, ModuleError::NotImplemented);
    }
}
