//! Wiring of schemas, modules and storage into one JMAP service.
//!
//! [`JmapService`] owns everything a request needs: the [`Executor`] with the
//! core and mail modules, the account table and the mail store. HTTP
//! handlers only translate between axum types and this service.

pub mod config;

pub use config::ServerConfig;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context as _;
use serde_json::{json, Map, Value as JsonValue};
use tracing::info;

use jmap_core::models::{CoreSchemas, HeaderSchemas, MailSchemas, CORE_URN, MAIL_URN};
use jmap_core::modules::{CoreModule, MailModule};
use jmap_core::{
    AccountBackend, Executor, ExecutorConfig, MarshalError, Marshaller, Module, Principal, Record,
    RequestContext, RequestError, Response, SchemaRegistry, StaticAccounts, View,
};

use crate::storage::{Fixture, MemoryMailStore};

/// The assembled JMAP service for one configured user.
pub struct JmapService {
    config: ServerConfig,
    executor: Executor,
    marshaller: Marshaller,
    accounts: Arc<StaticAccounts>,
    store: Arc<MemoryMailStore>,
    session_state: String,
}

impl JmapService {
    /// Builds the schema registry, seeds the store and registers the modules.
    ///
    /// # Errors
    ///
    /// Fails if a schema is inconsistent or the fixture cannot be loaded.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let core = CoreSchemas::new()?;
        let headers = HeaderSchemas::new()?;
        let mail = MailSchemas::new(&core, &headers)?;

        let mut registry = SchemaRegistry::new();
        core.register(&mut registry)?;
        mail.register(&mut registry)?;
        let marshaller = Marshaller::new(Arc::new(registry));

        let account = Record::new(&core.account)
            .with("name", config.account_name.as_str())?
            .with("is_personal", true)?
            .with("is_read_only", false)?
            .with("has_data_for", vec![MAIL_URN])?;
        let accounts = Arc::new(StaticAccounts::new().with_account(
            config.username.as_str(),
            config.account_id.as_str(),
            account,
        ));

        let store = Arc::new(MemoryMailStore::new(
            config.account_id.as_str(),
            marshaller.clone(),
            &core,
            &mail,
        ));
        let fixture = match &config.fixture {
            Some(path) => Fixture::from_path(path)?,
            None => Fixture::sample(),
        };
        store.load(&fixture).context("loading mail fixture")?;

        let auth: Arc<dyn AccountBackend> = Arc::clone(&accounts) as Arc<dyn AccountBackend>;
        let modules: Vec<Arc<dyn Module>> = vec![
            Arc::new(CoreModule::new(marshaller.clone())),
            Arc::new(MailModule::new(
                marshaller.clone(),
                &mail,
                Arc::clone(&store),
                Some(auth),
            )),
        ];
        let capabilities: BTreeSet<String> =
            [CORE_URN, MAIL_URN].into_iter().map(String::from).collect();
        let executor = Executor::new(
            modules,
            marshaller.clone(),
            ExecutorConfig {
                max_calls_in_request: config.max_calls_in_request,
                capabilities: Some(capabilities),
            },
        );
        info!(
            username = %config.username,
            account_id = %config.account_id,
            methods = executor.methods().len(),
            "JMAP service ready"
        );

        Ok(Self {
            config,
            executor,
            marshaller,
            accounts,
            store,
            session_state: uuid::Uuid::new_v4().simple().to_string(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MemoryMailStore> {
        &self.store
    }

    /// Identifies this session resource; changes only on restart.
    #[must_use]
    pub fn session_state(&self) -> &str {
        &self.session_state
    }

    /// Context for a request attributed to the configured user.
    #[must_use]
    pub fn context(&self, request_id: &str) -> RequestContext {
        RequestContext::new(request_id).with_principal(Principal::new(self.config.username.as_str()))
    }

    /// Runs one API request body.
    ///
    /// # Errors
    ///
    /// Returns the request-level error that rejected the batch.
    pub fn handle(&self, body: &[u8], request_id: &str) -> Result<Response, RequestError> {
        let ctx = self.context(request_id);
        let mut response = self.executor.handle_slice(body, &ctx)?;
        response.session_state = Some(self.session_state.clone());
        Ok(response)
    }

    fn capabilities(&self) -> JsonValue {
        json!({
            CORE_URN: {
                "maxSizeUpload": 0,
                "maxConcurrentUpload": 0,
                "maxSizeRequest": self.config.max_size_request,
                "maxConcurrentRequests": self.config.max_concurrent_requests,
                "maxCallsInRequest": self.config.max_calls_in_request,
                "maxObjectsInGet": self.config.max_objects_in_get,
                "maxObjectsInSet": self.config.max_objects_in_set,
                "collationAlgorithms": ["i;ascii-casemap"],
            },
            MAIL_URN: {},
        })
    }

    /// The session resource served at `/.well-known/jmap`.
    ///
    /// # Errors
    ///
    /// Fails if an account record cannot be marshaled.
    pub fn session(&self, request_id: &str) -> Result<JsonValue, MarshalError> {
        let ctx = self.context(request_id);
        let mut accounts = Map::new();
        let mut primary = Map::new();
        for (id, account) in self.accounts.accounts_for(&ctx) {
            let mut body = self.marshaller.marshal(&account, View::Server)?;
            let data_for = account.strings("has_data_for").unwrap_or_default();
            let account_capabilities: Map<String, JsonValue> = data_for
                .iter()
                .map(|urn| ((*urn).to_string(), json!({})))
                .collect();
            for urn in data_for {
                primary
                    .entry(urn.to_string())
                    .or_insert_with(|| JsonValue::String(id.clone()));
            }
            if let Some(obj) = body.as_object_mut() {
                obj.insert(
                    "accountCapabilities".to_string(),
                    JsonValue::Object(account_capabilities),
                );
            }
            accounts.insert(id, body);
        }

        let base = self.config.public_url.trim_end_matches('/');
        Ok(json!({
            "capabilities": self.capabilities(),
            "accounts": accounts,
            "primaryAccounts": primary,
            "username": self.config.username,
            "apiUrl": format!("{base}/jmap"),
            "downloadUrl": format!("{base}/download/{{accountId}}/{{blobId}}/{{name}}?accept={{type}}"),
            "uploadUrl": format!("{base}/upload/{{accountId}}/"),
            "eventSourceUrl": format!("{base}/events?types={{types}}&closeafter={{closeafter}}&ping={{ping}}"),
            "state": self.session_state,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JmapService {
        JmapService::new(ServerConfig::default()).unwrap()
    }

    #[test]
    fn session_lists_the_configured_account() {
        let s = service();
        let session = s.session("r1").unwrap();
        assert_eq!(session["username"], "user@example.com");
        assert_eq!(session["primaryAccounts"][MAIL_URN], "a1");
        let account = &session["accounts"]["a1"];
        assert_eq!(account["name"], "user@example.com");
        assert_eq!(account["isPersonal"], true);
        assert_eq!(account["hasDataFor"], json!([MAIL_URN]));
        assert!(account["accountCapabilities"][MAIL_URN].is_object());
        assert_eq!(session["capabilities"][CORE_URN]["maxCallsInRequest"], 16);
        assert_eq!(session["apiUrl"], "/jmap");
        assert_eq!(session["state"], s.session_state());
    }

    #[test]
    fn handle_runs_mail_methods() {
        let s = service();
        let body = json!({
            "using": [CORE_URN, MAIL_URN],
            "methodCalls": [
                ["Mailbox/query", {"accountId": "a1", "filter": {"role": "inbox"}}, "q"],
                ["Mailbox/get", {
                    "accountId": "a1",
                    "#ids": {"resultOf": "q", "name": "Mailbox/query", "path": "/ids"},
                    "properties": ["name", "totalEmails"],
                }, "g"],
            ],
        });
        let response = s.handle(body.to_string().as_bytes(), "r1").unwrap();
        assert_eq!(response.session_state.as_deref(), Some(s.session_state()));
        let get = response.method_responses[1].data();
        assert_eq!(get["list"][0]["name"], "Inbox");
        assert_eq!(get["list"][0]["totalEmails"], 2);
    }

    #[test]
    fn handle_rejects_unknown_capability() {
        let s = service();
        let body = json!({"using": ["urn:example:nope"], "methodCalls": []});
        let err = s.handle(body.to_string().as_bytes(), "r1").unwrap_err();
        assert_eq!(err.kind, jmap_core::RequestErrorKind::UnknownCapability);
    }

    #[test]
    fn missing_fixture_file_fails_startup() {
        let config = ServerConfig {
            fixture: Some("/nonexistent/fixture.json".into()),
            ..ServerConfig::default()
        };
        assert!(JmapService::new(config).is_err());
    }

    #[test]
    fn fixture_file_seeds_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        std::fs::write(
            &path,
            json!({"mailboxes": [{"id": "m1", "name": "Only"}]}).to_string(),
        )
        .unwrap();
        let s = JmapService::new(ServerConfig {
            fixture: Some(path),
            ..ServerConfig::default()
        })
        .unwrap();
        let body = json!([["Mailbox/get", {"accountId": "a1"}, "0"]]);
        let response = s.handle(body.to_string().as_bytes(), "r1").unwrap();
        assert_eq!(response.method_responses[0].data()["list"][0]["id"], "m1");
    }
}
