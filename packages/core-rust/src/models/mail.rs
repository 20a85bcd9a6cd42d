//! Mail (RFC 8621) object schemas and the argument/response schemas of the
//! mail methods.

use std::sync::Arc;

use crate::case::to_snake_case;
use crate::models::core::CoreSchemas;
use crate::models::headers::{FlattenedHeadersHook, HeaderSchemas};
use crate::models::standard;
use crate::registry::{RegistryError, SchemaRegistry};
use crate::schema::{Field, FieldType, Schema, SchemaError};
use crate::value::Value;

/// Properties returned by `Email/get` when the client does not ask for any.
pub const DEFAULT_EMAIL_GET_PROPERTIES: &[&str] = &[
    "id",
    "blobId",
    "threadId",
    "mailboxIds",
    "keywords",
    "size",
    "receivedAt",
    "messageId",
    "inReplyTo",
    "references",
    "sender",
    "from",
    "to",
    "cc",
    "bcc",
    "replyTo",
    "subject",
    "sentAt",
    "hasAttachment",
    "preview",
    "bodyValues",
    "textBody",
    "htmlBody",
    "attachments",
];

/// Default `bodyProperties` for `Email/get`.
pub const DEFAULT_BODY_PROPERTIES: &[&str] = &[
    "partId",
    "blobId",
    "size",
    "name",
    "type",
    "charset",
    "disposition",
    "cid",
    "language",
    "location",
];

fn empty_list() -> Value {
    Value::List(Vec::new())
}

fn empty_map() -> Value {
    Value::Map(std::collections::BTreeMap::new())
}

fn non_empty(value: &Value) -> Result<(), String> {
    match value.as_str() {
        Some("") => Err("must not be empty".to_string()),
        _ => Ok(()),
    }
}

/// Every mail schema, built once and shared by the mail module.
#[derive(Debug, Clone)]
pub struct MailSchemas {
    pub headers: HeaderSchemas,

    pub mailbox_rights: Arc<Schema>,
    pub mailbox: Arc<Schema>,
    pub thread: Arc<Schema>,
    pub email_address: Arc<Schema>,
    pub email_header: Arc<Schema>,
    pub email_body_value: Arc<Schema>,
    pub email_body_part: Arc<Schema>,
    pub email: Arc<Schema>,

    pub mailbox_filter: Arc<Schema>,
    pub mailbox_filter_operator: Arc<Schema>,
    pub email_filter: Arc<Schema>,
    pub email_filter_operator: Arc<Schema>,

    pub mailbox_get_args: Arc<Schema>,
    pub mailbox_get_response: Arc<Schema>,
    pub mailbox_changes_args: Arc<Schema>,
    pub mailbox_changes_response: Arc<Schema>,
    pub mailbox_query_args: Arc<Schema>,
    pub mailbox_query_response: Arc<Schema>,
    pub mailbox_set_args: Arc<Schema>,
    pub mailbox_set_response: Arc<Schema>,

    pub email_get_args: Arc<Schema>,
    pub email_get_response: Arc<Schema>,
    pub email_query_args: Arc<Schema>,
    pub email_query_response: Arc<Schema>,
    pub email_set_args: Arc<Schema>,
    pub email_set_response: Arc<Schema>,

    pub thread_get_args: Arc<Schema>,
    pub thread_get_response: Arc<Schema>,
    pub thread_changes_args: Arc<Schema>,
    pub thread_changes_response: Arc<Schema>,
}

impl MailSchemas {
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if a schema definition is inconsistent.
    #[allow(clippy::too_many_lines)]
    pub fn new(core: &CoreSchemas, headers: &HeaderSchemas) -> Result<Self, SchemaError> {
        let mut rights = Schema::builder("MailboxRights");
        for name in [
            "may_read_items",
            "may_add_items",
            "may_remove_items",
            "may_set_seen",
            "may_set_keywords",
            "may_create_child",
            "may_rename",
            "may_delete",
            "may_submit",
        ] {
            rights = rights.field(Field::new(name, FieldType::Bool));
        }
        let mailbox_rights = rights.build()?;

        let counter = |name: &str| {
            Field::new(name, FieldType::UnsignedInt)
                .with_default(0)
                .server_set()
        };
        let mailbox = Schema::builder("Mailbox")
            .field(Field::new("id", FieldType::String).server_set())
            .field(Field::new("name", FieldType::String).validate(non_empty))
            .field(Field::optional("parent_id", FieldType::String))
            .field(Field::optional("role", FieldType::String))
            .field(Field::new("sort_order", FieldType::UnsignedInt).with_default(0))
            .field(counter("total_emails"))
            .field(counter("unread_emails"))
            .field(counter("total_threads"))
            .field(counter("unread_threads"))
            .field(Field::optional("my_rights", FieldType::record(&mailbox_rights)).server_set())
            .field(Field::new("is_subscribed", FieldType::Bool).with_default(false))
            .build()?;

        let thread = Schema::builder("Thread")
            .field(Field::new("id", FieldType::String).server_set())
            .field(Field::new("email_ids", FieldType::string_list()))
            .build()?;

        let email_address = Schema::builder("EmailAddress")
            .field(Field::optional("name", FieldType::String))
            .field(Field::new("email", FieldType::String))
            .build()?;

        let email_header = Schema::builder("EmailHeader")
            .field(Field::new("name", FieldType::String))
            .field(Field::new("value", FieldType::String))
            .build()?;

        let email_body_value = Schema::builder("EmailBodyValue")
            .field(Field::new("value", FieldType::String))
            .field(Field::new("is_encoding_problem", FieldType::Bool).with_default(false))
            .field(Field::new("is_truncated", FieldType::Bool).with_default(false))
            .build()?;

        let body_part = || FieldType::named("EmailBodyPart");
        let email_body_part = Schema::builder("EmailBodyPart")
            .field(Field::optional("part_id", FieldType::String))
            .field(Field::optional("blob_id", FieldType::String))
            .field(Field::new("size", FieldType::UnsignedInt).with_default(0))
            .field(
                Field::new("headers", FieldType::list(FieldType::record(&email_header)))
                    .with_default(empty_list()),
            )
            .field(Field::optional("name", FieldType::String))
            .field(Field::new("type", FieldType::String))
            .field(Field::optional("charset", FieldType::String))
            .field(Field::optional("disposition", FieldType::String))
            .field(Field::optional("cid", FieldType::String))
            .field(Field::optional("language", FieldType::string_list()))
            .field(Field::optional("location", FieldType::String))
            .field(Field::optional("sub_parts", FieldType::list(body_part())))
            .build()?;

        let addresses = || FieldType::list(FieldType::record(&email_address));
        let email = Schema::builder("Email")
            .field(Field::new("id", FieldType::String).server_set())
            .field(Field::new("blob_id", FieldType::String).server_set())
            .field(Field::new("thread_id", FieldType::String).server_set())
            .field(Field::new("mailbox_ids", FieldType::string_set()))
            .field(Field::new("keywords", FieldType::string_set()).with_default(empty_map()))
            .field(
                Field::new("size", FieldType::UnsignedInt)
                    .with_default(0)
                    .server_set(),
            )
            .field(Field::optional("received_at", FieldType::Date))
            .field(
                Field::new("headers", FieldType::list(FieldType::record(&email_header)))
                    .with_default(empty_list()),
            )
            .field(
                Field::new(
                    "header_fields",
                    FieldType::list(FieldType::record(&headers.queried)),
                )
                .with_default(empty_list())
                .hook(FlattenedHeadersHook::new(headers)),
            )
            .field(Field::optional("message_id", FieldType::string_list()))
            .field(Field::optional("in_reply_to", FieldType::string_list()))
            .field(Field::optional("references", FieldType::string_list()))
            .field(Field::optional("sender", addresses()))
            .field(Field::optional("from_", addresses()))
            .field(Field::optional("to", addresses()))
            .field(Field::optional("cc", addresses()))
            .field(Field::optional("bcc", addresses()))
            .field(Field::optional("reply_to", addresses()))
            .field(Field::optional("subject", FieldType::String))
            .field(Field::optional("sent_at", FieldType::Date))
            .field(Field::optional("body_structure", body_part()))
            .field(
                Field::new(
                    "body_values",
                    FieldType::map(FieldType::String, FieldType::record(&email_body_value)),
                )
                .with_default(empty_map()),
            )
            .field(Field::new("text_body", FieldType::list(body_part())).with_default(empty_list()))
            .field(Field::new("html_body", FieldType::list(body_part())).with_default(empty_list()))
            .field(Field::new("attachments", FieldType::list(body_part())).with_default(empty_list()))
            .field(
                Field::new("has_attachment", FieldType::Bool)
                    .with_default(false)
                    .server_set(),
            )
            .field(
                Field::new("preview", FieldType::String)
                    .with_default("")
                    .server_set(),
            )
            .build()?;

        let mailbox_filter = Schema::builder("MailboxFilterCondition")
            .field(Field::optional("parent_id", FieldType::String))
            .field(Field::optional("name", FieldType::String))
            .field(Field::optional("role", FieldType::String))
            .field(Field::optional("has_any_role", FieldType::Bool))
            .field(Field::optional("is_subscribed", FieldType::Bool))
            .build()?;
        let mailbox_filter_operator = standard::filter_operator("MailboxFilterOperator", &mailbox_filter)?;

        let email_filter = Schema::builder("EmailFilterCondition")
            .field(Field::optional("in_mailbox", FieldType::String))
            .field(Field::optional("in_mailbox_other_than", FieldType::string_list()))
            .field(Field::optional("before", FieldType::Date))
            .field(Field::optional("after", FieldType::Date))
            .field(Field::optional("min_size", FieldType::UnsignedInt))
            .field(Field::optional("max_size", FieldType::UnsignedInt))
            .field(Field::optional("has_keyword", FieldType::String))
            .field(Field::optional("not_keyword", FieldType::String))
            .field(Field::optional("text", FieldType::String))
            .field(Field::optional("from_", FieldType::String))
            .field(Field::optional("to", FieldType::String))
            .field(Field::optional("subject", FieldType::String))
            .field(Field::optional("body", FieldType::String))
            .build()?;
        let email_filter_operator = standard::filter_operator("EmailFilterOperator", &email_filter)?;

        let comparator = &core.comparator;

        let mailbox_query_base = standard::query_args(
            "MailboxQueryArgs",
            &mailbox_filter_operator,
            &mailbox_filter,
            comparator,
        )?;
        let mailbox_query_args = Schema::builder("MailboxQueryArgs")
            .extend(&mailbox_query_base)
            .field(Field::new("sort_as_tree", FieldType::Bool).with_default(false))
            .field(Field::new("filter_as_tree", FieldType::Bool).with_default(false))
            .build()?;

        let mailbox_changes_base = standard::changes_response("MailboxChangesResponse")?;
        let mailbox_changes_response = Schema::builder("MailboxChangesResponse")
            .extend(&mailbox_changes_base)
            .field(Field::optional("updated_properties", FieldType::string_list()))
            .build()?;

        let email_get_base = standard::get_args(
            "EmailGetArgs",
            &email,
            DEFAULT_EMAIL_GET_PROPERTIES,
            Some(headers),
        )?;
        let body_defaults: Vec<Value> = DEFAULT_BODY_PROPERTIES
            .iter()
            .map(|p| Value::String(to_snake_case(p)))
            .collect();
        let email_get_args = Schema::builder("EmailGetArgs")
            .extend(&email_get_base)
            .field(
                Field::new("body_properties", FieldType::optional(FieldType::string_list()))
                    .with_default(Value::List(body_defaults)),
            )
            .field(Field::new("fetch_text_body_values", FieldType::Bool).with_default(false))
            .field(
                Field::new("fetch_html_body_values", FieldType::Bool)
                    .with_default(false)
                    .key("fetchHTMLBodyValues"),
            )
            .field(Field::new("fetch_all_body_values", FieldType::Bool).with_default(false))
            .field(Field::new("max_body_value_bytes", FieldType::UnsignedInt).with_default(0))
            .build()?;

        let email_query_base = standard::query_args(
            "EmailQueryArgs",
            &email_filter_operator,
            &email_filter,
            comparator,
        )?;
        let email_query_args = Schema::builder("EmailQueryArgs")
            .extend(&email_query_base)
            .field(Field::new("collapse_threads", FieldType::Bool).with_default(false))
            .build()?;

        let email_query_response_base = standard::query_response("EmailQueryResponse")?;
        let email_query_response = Schema::builder("EmailQueryResponse")
            .extend(&email_query_response_base)
            .field(Field::new("collapse_threads", FieldType::Bool).with_default(false))
            .build()?;

        let mailbox_set_base = standard::set_args("MailboxSetArgs", &mailbox)?;
        let mailbox_set_args = Schema::builder("MailboxSetArgs")
            .extend(&mailbox_set_base)
            .field(Field::new("on_destroy_remove_emails", FieldType::Bool).with_default(false))
            .build()?;

        Ok(Self {
            headers: headers.clone(),
            mailbox_get_args: standard::get_args("MailboxGetArgs", &mailbox, &[], None)?,
            mailbox_get_response: standard::get_response("MailboxGetResponse", &mailbox)?,
            mailbox_changes_args: standard::changes_args("MailboxChangesArgs")?,
            mailbox_changes_response,
            mailbox_query_args,
            mailbox_query_response: standard::query_response("MailboxQueryResponse")?,
            mailbox_set_args,
            mailbox_set_response: standard::set_response(
                "MailboxSetResponse",
                &mailbox,
                &core.set_error,
            )?,
            email_get_args,
            email_get_response: standard::get_response("EmailGetResponse", &email)?,
            email_query_args,
            email_query_response,
            email_set_args: standard::set_args("EmailSetArgs", &email)?,
            email_set_response: standard::set_response("EmailSetResponse", &email, &core.set_error)?,
            thread_get_args: standard::get_args("ThreadGetArgs", &thread, &[], None)?,
            thread_get_response: standard::get_response("ThreadGetResponse", &thread)?,
            thread_changes_args: standard::changes_args("ThreadChangesArgs")?,
            thread_changes_response: standard::changes_response("ThreadChangesResponse")?,
            mailbox_rights,
            mailbox,
            thread,
            email_address,
            email_header,
            email_body_value,
            email_body_part,
            email,
            mailbox_filter,
            mailbox_filter_operator,
            email_filter,
            email_filter_operator,
        })
    }

    fn all(&self) -> Vec<Arc<Schema>> {
        [
            &self.headers.query,
            &self.headers.queried,
            &self.mailbox_rights,
            &self.mailbox,
            &self.thread,
            &self.email_address,
            &self.email_header,
            &self.email_body_value,
            &self.email_body_part,
            &self.email,
            &self.mailbox_filter,
            &self.mailbox_filter_operator,
            &self.email_filter,
            &self.email_filter_operator,
            &self.mailbox_get_args,
            &self.mailbox_get_response,
            &self.mailbox_changes_args,
            &self.mailbox_changes_response,
            &self.mailbox_query_args,
            &self.mailbox_query_response,
            &self.mailbox_set_args,
            &self.mailbox_set_response,
            &self.email_get_args,
            &self.email_get_response,
            &self.email_query_args,
            &self.email_query_response,
            &self.email_set_args,
            &self.email_set_response,
            &self.thread_get_args,
            &self.thread_get_response,
            &self.thread_changes_args,
            &self.thread_changes_response,
        ]
        .into_iter()
        .map(Arc::clone)
        .collect()
    }

    /// Registers every mail schema, including the header query schemas.
    /// `EmailBodyPart` must be registered for `subParts` to resolve.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if any name is already taken.
    pub fn register(&self, registry: &mut SchemaRegistry) -> Result<(), RegistryError> {
        registry.register_all(self.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::Marshaller;
    use crate::record::Record;
    use crate::schema::View;
    use serde_json::json;

    fn setup() -> (MailSchemas, Marshaller) {
        let core = CoreSchemas::new().unwrap();
        let headers = HeaderSchemas::new().unwrap();
        let mail = MailSchemas::new(&core, &headers).unwrap();
        let mut registry = SchemaRegistry::new();
        core.register(&mut registry).unwrap();
        mail.register(&mut registry).unwrap();
        (mail, Marshaller::new(Arc::new(registry)))
    }

    #[test]
    fn registers_without_collisions() {
        let (_, m) = setup();
        for name in ["Email", "EmailBodyPart", "MailboxGetArgs", "HeaderFieldQuery"] {
            assert!(m.registry().contains(name), "{name} missing");
        }
    }

    #[test]
    fn mailbox_client_view_hides_counters() {
        let (mail, m) = setup();
        let err = m
            .unmarshal(
                &mail.mailbox,
                View::Client,
                &json!({"name": "Inbox", "totalEmails": 3}),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown property: totalEmails");

        let mailbox = m
            .unmarshal(&mail.mailbox, View::Client, &json!({"name": "Inbox"}))
            .unwrap();
        assert_eq!(mailbox.int("total_emails"), Some(0));
        assert_eq!(m.marshal(&mailbox, View::Client).unwrap(), json!({"name": "Inbox"}));

        let err = m
            .unmarshal(&mail.mailbox, View::Client, &json!({"name": ""}))
            .unwrap_err();
        assert_eq!(err.to_string(), "name: must not be empty");
    }

    #[test]
    fn email_from_uses_bare_key() {
        let (mail, m) = setup();
        let raw = json!({
            "id": "e1",
            "blobId": "b1",
            "threadId": "t1",
            "mailboxIds": {"m1": true},
            "from": [{"name": "Alice", "email": "alice@example.com"}],
            "receivedAt": "2024-03-01T10:00:00Z",
        });
        let email = m.unmarshal(&mail.email, View::Server, &raw).unwrap();
        let from = email.list("from_").unwrap();
        assert_eq!(from[0].as_record().unwrap().str("email"), Some("alice@example.com"));
        assert_eq!(m.marshal(&email, View::Server).unwrap(), raw);
    }

    #[test]
    fn body_parts_nest_through_registry() {
        let (mail, m) = setup();
        let raw = json!({
            "type": "multipart/alternative",
            "subParts": [
                {"type": "text/plain", "partId": "1"},
                {"type": "text/html", "partId": "2", "subParts": []},
            ],
        });
        let part = m.unmarshal(&mail.email_body_part, View::Server, &raw).unwrap();
        let subs = part.list("sub_parts").unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1].as_record().unwrap().str("part_id"), Some("2"));
        assert_eq!(m.marshal(&part, View::Server).unwrap(), raw);
    }

    #[test]
    fn email_get_args_defaults_and_html_key() {
        let (mail, m) = setup();
        let args = m
            .unmarshal(
                &mail.email_get_args,
                View::Client,
                &json!({
                    "accountId": "a1",
                    "fetchHTMLBodyValues": true,
                    "properties": ["subject", "header:List-Id:asText"],
                }),
            )
            .unwrap();
        assert_eq!(args.bool("fetch_html_body_values"), Some(true));
        assert_eq!(args.bool("fetch_text_body_values"), Some(false));
        let props = args.list("properties").unwrap();
        assert_eq!(props[0].as_str(), Some("subject"));
        assert_eq!(props[1].as_record().unwrap().str("name"), Some("List-Id"));

        let defaults = m
            .unmarshal(&mail.email_get_args, View::Client, &json!({"accountId": "a1"}))
            .unwrap();
        let names = defaults.strings("properties").unwrap();
        assert!(names.contains(&"from_"));
        assert!(names.contains(&"has_attachment"));
    }

    #[test]
    fn email_query_filter_and_sort() {
        let (mail, m) = setup();
        let args = m
            .unmarshal(
                &mail.email_query_args,
                View::Client,
                &json!({
                    "accountId": "a1",
                    "filter": {"inMailbox": "m1", "minSize": 10},
                    "sort": [{"property": "receivedAt", "isAscending": false}],
                    "collapseThreads": true,
                }),
            )
            .unwrap();
        let filter = args.record("filter").unwrap();
        assert_eq!(filter.schema().name(), "EmailFilterCondition");
        assert_eq!(filter.int("min_size"), Some(10));
        assert_eq!(args.bool("collapse_threads"), Some(true));
        let sort = args.list("sort").unwrap();
        assert_eq!(sort[0].as_record().unwrap().bool("is_ascending"), Some(false));
    }

    #[test]
    fn email_set_response_partial_output() {
        let (mail, m) = setup();
        let response = Record::new(&mail.email_set_response)
            .with("account_id", "a1")
            .unwrap()
            .with("new_state", "2")
            .unwrap()
            .with("destroyed", vec!["e1"])
            .unwrap();
        assert_eq!(
            m.marshal(&response, View::Server).unwrap(),
            json!({"accountId": "a1", "newState": "2", "destroyed": ["e1"]})
        );
    }
}
