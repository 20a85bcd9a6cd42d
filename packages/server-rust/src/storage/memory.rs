//! In-memory mail store serving every [`MailBackend`] method for a single
//! account.
//!
//! Objects are kept as server-view records behind a `parking_lot` lock.
//! Threads are derived from the emails' `threadId`; mailbox counters are
//! computed on read. All mutations advance the store's [`ChangeLog`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use jmap_core::case::to_snake_case;
use jmap_core::models::headers::HeaderQuery;
use jmap_core::models::{CoreSchemas, MailSchemas};
use jmap_core::modules::MailBackend;
use jmap_core::{
    Marshaller, MethodError, ModuleError, Record, RequestContext, Value, View,
};

use super::changes::{ChangeKind, ChangeLog, ChangesError, ObjectType};
use super::patch::apply_patch;
use super::query::{contains_text, matches, sort_records, window};

const MAILBOX_SORTABLE: &[&str] = &["name", "sortOrder"];
const EMAIL_SORTABLE: &[&str] = &["receivedAt", "sentAt", "size", "subject"];
const SEEN: &str = "$seen";

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// Seed data: mailboxes and emails as server-view JMAP JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Fixture {
    pub mailboxes: Vec<JsonValue>,
    pub emails: Vec<JsonValue>,
}

impl Fixture {
    /// Reads a fixture file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a fixture document.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing fixture {}", path.display()))
    }

    /// A small mailbox tree with two messages, used when no fixture file is
    /// configured.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            mailboxes: vec![
                serde_json::json!({"id": "inbox", "name": "Inbox", "role": "inbox", "sortOrder": 1}),
                serde_json::json!({"id": "archive", "name": "Archive", "role": "archive", "sortOrder": 2}),
                serde_json::json!({"id": "projects", "name": "Projects", "parentId": "archive", "sortOrder": 3}),
            ],
            emails: vec![
                serde_json::json!({
                    "id": "e1",
                    "blobId": "b1",
                    "threadId": "t1",
                    "mailboxIds": {"inbox": true},
                    "keywords": {"$seen": true},
                    "size": 1024,
                    "receivedAt": "2024-03-01T09:00:00Z",
                    "from": [{"name": "Alice", "email": "alice@example.com"}],
                    "to": [{"email": "bob@example.com"}],
                    "subject": "Quarterly report",
                    "preview": "Numbers attached",
                    "headers": [{"name": "X-Mailer", "value": "fixture"}],
                }),
                serde_json::json!({
                    "id": "e2",
                    "blobId": "b2",
                    "threadId": "t1",
                    "mailboxIds": {"inbox": true},
                    "size": 512,
                    "receivedAt": "2024-03-02T09:00:00Z",
                    "from": [{"name": "Bob", "email": "bob@example.com"}],
                    "to": [{"email": "alice@example.com"}],
                    "subject": "Re: Quarterly report",
                    "preview": "Thanks",
                }),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    mailboxes: BTreeMap<String, Record>,
    emails: BTreeMap<String, Record>,
    log: ChangeLog,
    next_id: u64,
}

impl Inner {
    fn new_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn threads(&self) -> BTreeMap<String, Vec<&Record>> {
        let mut threads: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
        for email in self.emails.values() {
            if let Some(thread_id) = email.str("thread_id") {
                threads.entry(thread_id.to_string()).or_default().push(email);
            }
        }
        for emails in threads.values_mut() {
            emails.sort_by(|a, b| {
                received_at(a)
                    .cmp(&received_at(b))
                    .then_with(|| a.str("id").cmp(&b.str("id")))
            });
        }
        threads
    }

    fn commit(&mut self, pending: Vec<(ObjectType, String, ChangeKind)>) {
        if pending.is_empty() {
            return;
        }
        self.log.advance();
        for (object, id, kind) in pending {
            self.log.record(object, id, kind);
        }
    }
}

/// Mail store for one account, loaded from a [`Fixture`].
pub struct MemoryMailStore {
    account_id: String,
    marshaller: Marshaller,
    core: CoreSchemas,
    schemas: MailSchemas,
    inner: RwLock<Inner>,
}

impl MemoryMailStore {
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        marshaller: Marshaller,
        core: &CoreSchemas,
        schemas: &MailSchemas,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            marshaller,
            core: core.clone(),
            schemas: schemas.clone(),
            inner: RwLock::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Current state string, shared by every object type.
    #[must_use]
    pub fn state(&self) -> String {
        self.inner.read().log.state().to_string()
    }

    /// Adds the fixture's objects as one state change.
    ///
    /// # Errors
    ///
    /// Fails on the first object that does not validate, naming its index.
    pub fn load(&self, fixture: &Fixture) -> anyhow::Result<()> {
        let mut mailboxes = Vec::with_capacity(fixture.mailboxes.len());
        for (i, raw) in fixture.mailboxes.iter().enumerate() {
            let record = self
                .marshaller
                .unmarshal(&self.schemas.mailbox, View::Server, raw)
                .with_context(|| format!("fixture mailbox {i}"))?;
            mailboxes.push(record);
        }
        let mut emails = Vec::with_capacity(fixture.emails.len());
        for (i, raw) in fixture.emails.iter().enumerate() {
            let record = self
                .marshaller
                .unmarshal(&self.schemas.email, View::Server, raw)
                .with_context(|| format!("fixture email {i}"))?;
            emails.push(record);
        }

        let mut inner = self.inner.write();
        let mut pending = Vec::new();
        for mailbox in mailboxes {
            let id = mailbox.str("id").unwrap_or_default().to_string();
            pending.push((ObjectType::Mailbox, id.clone(), ChangeKind::Created));
            inner.mailboxes.insert(id, mailbox);
        }
        let mut threads = BTreeSet::new();
        for email in emails {
            let id = email.str("id").unwrap_or_default().to_string();
            if let Some(thread_id) = email.str("thread_id") {
                threads.insert(thread_id.to_string());
            }
            pending.push((ObjectType::Email, id.clone(), ChangeKind::Created));
            inner.emails.insert(id, email);
        }
        pending.extend(
            threads
                .into_iter()
                .map(|t| (ObjectType::Thread, t, ChangeKind::Created)),
        );
        info!(
            mailboxes = inner.mailboxes.len(),
            emails = inner.emails.len(),
            "fixture loaded"
        );
        inner.commit(pending);
        Ok(())
    }

    fn check_account(&self, args: &Record) -> Result<(), MethodError> {
        match args.str("account_id") {
            Some(id) if id == self.account_id => Ok(()),
            Some(id) => Err(MethodError::account_not_found(format!("unknown account {id}"))),
            None => Err(MethodError::invalid_arguments("accountId is required")),
        }
    }

    fn set_error(&self, kind: &str, description: impl Into<String>) -> Result<Value, ModuleError> {
        Ok(Value::Record(self.set_error_record(kind, description)?))
    }

    fn set_error_record(&self, kind: &str, description: impl Into<String>) -> Result<Record, ModuleError> {
        Ok(Record::new(&self.core.set_error)
            .with("type", kind)?
            .with("description", description.into())?)
    }

    fn invalid_properties(
        &self,
        properties: Vec<String>,
        description: impl Into<String>,
    ) -> Result<Value, ModuleError> {
        let record = self
            .set_error_record("invalidProperties", description)?
            .with("properties", properties)?;
        Ok(Value::Record(record))
    }

    // -- mailboxes ----------------------------------------------------------

    fn mailbox_with_counts(&self, inner: &Inner, mailbox: &Record) -> Result<Record, ModuleError> {
        let id = mailbox.str("id").unwrap_or_default();
        let mut total_emails = 0_i64;
        let mut unread_emails = 0_i64;
        let mut threads = BTreeSet::new();
        let mut unread_threads = BTreeSet::new();
        for email in inner.emails.values() {
            if !email.map("mailbox_ids").is_some_and(|m| m.contains_key(id)) {
                continue;
            }
            total_emails += 1;
            let thread_id = email.str("thread_id").unwrap_or_default();
            threads.insert(thread_id);
            if !has_keyword(email, SEEN) {
                unread_emails += 1;
                unread_threads.insert(thread_id);
            }
        }

        let mut out = mailbox.clone();
        out.set("total_emails", total_emails)?
            .set("unread_emails", unread_emails)?
            .set("total_threads", i64::try_from(threads.len()).unwrap_or(i64::MAX))?
            .set(
                "unread_threads",
                i64::try_from(unread_threads.len()).unwrap_or(i64::MAX),
            )?;
        if !out.is_set("my_rights") {
            let mut rights = Record::new(&self.schemas.mailbox_rights);
            for field in self.schemas.mailbox_rights.fields() {
                rights.set(field.name(), true)?;
            }
            out.set("my_rights", rights)?;
        }
        Ok(out)
    }

    fn mailbox_matches(condition: &Record, mailbox: &Record) -> bool {
        // An explicit null parentId selects top-level mailboxes.
        if condition.is_set("parent_id") && condition.str("parent_id") != mailbox.str("parent_id") {
            return false;
        }
        if let Some(name) = condition.str("name") {
            if !contains_text(mailbox.str("name").unwrap_or_default(), name) {
                return false;
            }
        }
        if condition.is_set("role") && condition.get("role") != mailbox.get("role") {
            return false;
        }
        if let Some(has_role) = condition.bool("has_any_role") {
            if mailbox.str("role").is_some() != has_role {
                return false;
            }
        }
        if let Some(subscribed) = condition.bool("is_subscribed") {
            if mailbox.bool("is_subscribed") != Some(subscribed) {
                return false;
            }
        }
        true
    }

    // -- emails -------------------------------------------------------------

    fn email_matches(condition: &Record, email: &Record) -> bool {
        let mailbox_ids = email.map("mailbox_ids");
        if let Some(mailbox) = condition.str("in_mailbox") {
            if !mailbox_ids.is_some_and(|m| m.contains_key(mailbox)) {
                return false;
            }
        }
        if let Some(excluded) = condition.strings("in_mailbox_other_than") {
            let other = mailbox_ids
                .is_some_and(|m| m.keys().any(|id| !excluded.contains(&id.as_str())));
            if !other {
                return false;
            }
        }

        let received = received_at(email);
        if let Some(before) = condition.get("before").and_then(Value::as_date) {
            if !received.is_some_and(|r| r < before) {
                return false;
            }
        }
        if let Some(after) = condition.get("after").and_then(Value::as_date) {
            if !received.is_some_and(|r| r >= after) {
                return false;
            }
        }

        let size = email.int("size").unwrap_or(0);
        if condition.int("min_size").is_some_and(|min| size < min) {
            return false;
        }
        if condition.int("max_size").is_some_and(|max| size >= max) {
            return false;
        }

        if let Some(keyword) = condition.str("has_keyword") {
            if !has_keyword(email, keyword) {
                return false;
            }
        }
        if let Some(keyword) = condition.str("not_keyword") {
            if has_keyword(email, keyword) {
                return false;
            }
        }

        let subject = email.str("subject").unwrap_or_default();
        if let Some(text) = condition.str("subject") {
            if !contains_text(subject, text) {
                return false;
            }
        }
        if let Some(text) = condition.str("from_") {
            if !addresses_contain(email, "from_", text) {
                return false;
            }
        }
        if let Some(text) = condition.str("to") {
            if !addresses_contain(email, "to", text) {
                return false;
            }
        }
        if let Some(text) = condition.str("body") {
            if !body_contains(email, text) {
                return false;
            }
        }
        if let Some(text) = condition.str("text") {
            let found = contains_text(subject, text)
                || contains_text(email.str("preview").unwrap_or_default(), text)
                || ["from_", "to", "cc", "bcc"]
                    .iter()
                    .any(|field| addresses_contain(email, field, text))
                || body_contains(email, text);
            if !found {
                return false;
            }
        }
        true
    }

    fn project_email(&self, email: &Record, args: &Record) -> Result<Record, ModuleError> {
        let properties = args.list("properties").unwrap_or_default();
        let mut out = Record::new(&self.schemas.email);
        out.set("id", email.get("id").cloned().unwrap_or(Value::Null))?;

        let mut header_fields = Vec::new();
        for property in properties {
            match property {
                Value::String(name) if name == "body_values" => {
                    out.set("body_values", body_values(email, args))?;
                }
                Value::String(name) => {
                    if let Some(value) = email.get(name) {
                        out.set(name, project_parts(name, value, args))?;
                    }
                }
                Value::Record(query) => {
                    let Some(parsed) = HeaderQuery::from_record(query) else {
                        continue;
                    };
                    let value = header_value(email, &parsed);
                    let field = self
                        .schemas
                        .headers
                        .queried_field(&parsed, query.str("original"), value)?;
                    header_fields.push(Value::Record(field));
                }
                _ => {}
            }
        }
        if !header_fields.is_empty() {
            out.set("header_fields", header_fields)?;
        }
        Ok(out)
    }

    fn create_email(
        &self,
        inner: &mut Inner,
        draft: &Record,
        pending: &mut Vec<(ObjectType, String, ChangeKind)>,
    ) -> Result<Result<Record, Value>, ModuleError> {
        let mailboxes: Vec<String> = draft
            .map("mailbox_ids")
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        if mailboxes.is_empty() {
            return Ok(Err(self.invalid_properties(
                vec!["mailboxIds".into()],
                "an email must belong to at least one mailbox",
            )?));
        }
        if let Some(missing) = mailboxes.iter().find(|m| !inner.mailboxes.contains_key(*m)) {
            return Ok(Err(self.invalid_properties(
                vec!["mailboxIds".into()],
                format!("no mailbox {missing}"),
            )?));
        }

        let id = inner.new_id("E");
        let blob_id = format!("B{}", &id[1..]);
        let thread_id = format!("T{}", &id[1..]);
        let size = serde_json::to_vec(&self.marshaller.marshal(draft, View::Client).map_err(
            |e| MethodError::server_fail(e.to_string()),
        )?)
        .map_or(0, |b| i64::try_from(b.len()).unwrap_or(i64::MAX));

        let mut email = draft.clone();
        email
            .set("id", id.as_str())?
            .set("blob_id", blob_id.as_str())?
            .set("thread_id", thread_id.as_str())?
            .set("size", size)?;
        if !email.is_set("received_at") {
            email.set("received_at", Utc::now())?;
        }

        let created = Record::new(&self.schemas.email)
            .with("id", id.as_str())?
            .with("blob_id", blob_id.as_str())?
            .with("thread_id", thread_id.as_str())?
            .with("size", size)?;

        inner.emails.insert(id.clone(), email);
        pending.push((ObjectType::Email, id, ChangeKind::Created));
        pending.push((ObjectType::Thread, thread_id, ChangeKind::Created));
        pending.extend(
            mailboxes
                .into_iter()
                .map(|m| (ObjectType::Mailbox, m, ChangeKind::Updated)),
        );
        Ok(Ok(created))
    }

    fn check_state(&self, inner: &Inner, args: &Record) -> Result<String, MethodError> {
        let state = inner.log.state().to_string();
        match args.str("if_in_state") {
            Some(expected) if expected != state => Err(MethodError::state_mismatch(format!(
                "state is {state}, not {expected}"
            ))),
            _ => Ok(state),
        }
    }
}

fn received_at(email: &Record) -> Option<&DateTime<Utc>> {
    email.get("received_at").and_then(Value::as_date)
}

fn has_keyword(email: &Record, keyword: &str) -> bool {
    email
        .map("keywords")
        .is_some_and(|k| k.get(keyword).and_then(Value::as_bool) == Some(true))
}

fn addresses_contain(email: &Record, field: &str, text: &str) -> bool {
    email.list(field).unwrap_or_default().iter().any(|address| {
        address.as_record().is_some_and(|a| {
            a.str("name").is_some_and(|n| contains_text(n, text))
                || a.str("email").is_some_and(|e| contains_text(e, text))
        })
    })
}

fn body_contains(email: &Record, text: &str) -> bool {
    email.map("body_values").is_some_and(|values| {
        values.values().any(|v| {
            v.as_record()
                .and_then(|r| r.str("value"))
                .is_some_and(|body| contains_text(body, text))
        })
    })
}

/// `header:*` value for `query`, read from the parsed header fields when
/// present and from the raw header list otherwise.
fn header_value(email: &Record, query: &HeaderQuery) -> JsonValue {
    for stored in email.list("header_fields").unwrap_or_default() {
        let Some(stored) = stored.as_record() else {
            continue;
        };
        let Some(found) = HeaderQuery::from_record(stored) else {
            continue;
        };
        if found.name.eq_ignore_ascii_case(&query.name)
            && found.form == query.form
            && found.all == query.all
        {
            if let Some(Value::Raw(raw)) = stored.get("value") {
                return raw.clone();
            }
        }
    }

    if query.form != "Raw" && query.form != "Text" {
        return if query.all { JsonValue::Array(Vec::new()) } else { JsonValue::Null };
    }
    let values: Vec<JsonValue> = email
        .list("headers")
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_record)
        .filter(|h| h.str("name").is_some_and(|n| n.eq_ignore_ascii_case(&query.name)))
        .filter_map(|h| h.str("value"))
        .map(|v| {
            let v = if query.form == "Text" { v.trim() } else { v };
            JsonValue::String(v.to_string())
        })
        .collect();
    if query.all {
        JsonValue::Array(values)
    } else {
        values.into_iter().last().unwrap_or(JsonValue::Null)
    }
}

fn body_property_names(args: &Record) -> Vec<String> {
    args.strings("body_properties")
        .unwrap_or_default()
        .into_iter()
        .map(to_snake_case)
        .collect()
}

fn project_part(part: &Record, names: &[String]) -> Record {
    let mut out = Record::new(part.schema());
    for name in names {
        if let Some(value) = part.get(name) {
            let value = match (name.as_str(), value) {
                ("sub_parts", Value::List(parts)) => Value::List(
                    parts
                        .iter()
                        .map(|p| match p.as_record() {
                            Some(p) => Value::Record(project_part(p, names)),
                            None => p.clone(),
                        })
                        .collect(),
                ),
                _ => value.clone(),
            };
            // `get` succeeded, so `name` is a field of the part schema.
            let _ = out.set(name, value);
        }
    }
    out
}

/// Restricts body part properties to `bodyProperties`.
fn project_parts(name: &str, value: &Value, args: &Record) -> Value {
    if !matches!(name, "body_structure" | "text_body" | "html_body" | "attachments") {
        return value.clone();
    }
    let names = body_property_names(args);
    match value {
        Value::Record(part) => Value::Record(project_part(part, &names)),
        Value::List(parts) => Value::List(
            parts
                .iter()
                .map(|p| match p.as_record() {
                    Some(p) => Value::Record(project_part(p, &names)),
                    None => p.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn part_ids(email: &Record, field: &str) -> BTreeSet<String> {
    email
        .list(field)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_record)
        .filter_map(|p| p.str("part_id"))
        .map(str::to_string)
        .collect()
}

/// The `bodyValues` selected by the `fetch*BodyValues` flags, truncated to
/// `maxBodyValueBytes`.
fn body_values(email: &Record, args: &Record) -> Value {
    let Some(values) = email.map("body_values") else {
        return Value::Map(BTreeMap::new());
    };
    let all = args.bool("fetch_all_body_values") == Some(true);
    let mut wanted = BTreeSet::new();
    if args.bool("fetch_text_body_values") == Some(true) {
        wanted.extend(part_ids(email, "text_body"));
    }
    if args.bool("fetch_html_body_values") == Some(true) {
        wanted.extend(part_ids(email, "html_body"));
    }
    let max = args
        .int("max_body_value_bytes")
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0);

    let mut out = BTreeMap::new();
    for (part_id, value) in values {
        if !all && !wanted.contains(part_id) {
            continue;
        }
        let value = match value.as_record() {
            Some(record) => Value::Record(truncate_body(record, max)),
            None => value.clone(),
        };
        out.insert(part_id.clone(), value);
    }
    Value::Map(out)
}

fn truncate_body(value: &Record, max: usize) -> Record {
    let text = value.str("value").unwrap_or_default();
    if max == 0 || text.len() <= max {
        return value.clone();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = value.clone();
    let truncated = text[..cut].to_string();
    if out.set("value", truncated).is_ok() {
        let _ = out.set("is_truncated", true);
    }
    out
}

fn ids_arg(args: &Record) -> Option<Vec<String>> {
    args.get("ids")
        .and_then(Value::as_list)
        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
}

fn changes_error(err: &ChangesError) -> MethodError {
    MethodError::cannot_calculate_changes(err.to_string())
}

fn as_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl MailBackend for MemoryMailStore {
    fn mailbox_get(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let inner = self.inner.read();
        let properties = args.strings("properties");

        let ids = ids_arg(args).unwrap_or_else(|| inner.mailboxes.keys().cloned().collect());
        let mut list = Vec::new();
        let mut not_found = Vec::new();
        for id in ids {
            let Some(mailbox) = inner.mailboxes.get(&id) else {
                not_found.push(id);
                continue;
            };
            let full = self.mailbox_with_counts(&inner, mailbox)?;
            let record = match &properties {
                None => full,
                Some(names) => {
                    let mut out = Record::new(&self.schemas.mailbox);
                    out.set("id", id.as_str())?;
                    for name in names {
                        if let Some(value) = full.get(name) {
                            out.set(name, value.clone())?;
                        }
                    }
                    out
                }
            };
            list.push(Value::Record(record));
        }

        Ok(Record::new(&self.schemas.mailbox_get_response)
            .with("account_id", self.account_id.as_str())?
            .with("state", inner.log.state().to_string())?
            .with("list", list)?
            .with("not_found", not_found)?)
    }

    fn mailbox_changes(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let inner = self.inner.read();
        let max = args.int("max_changes").and_then(|n| usize::try_from(n).ok());
        let changes = inner
            .log
            .since(ObjectType::Mailbox, args.str("since_state").unwrap_or_default(), max)
            .map_err(|e| changes_error(&e))?;

        Ok(Record::new(&self.schemas.mailbox_changes_response)
            .with("account_id", self.account_id.as_str())?
            .with("old_state", changes.old_state.to_string())?
            .with("new_state", changes.new_state.to_string())?
            .with("has_more_changes", changes.has_more_changes)?
            .with("created", changes.created)?
            .with("updated", changes.updated)?
            .with("destroyed", changes.destroyed)?
            .with("updated_properties", Value::Null)?)
    }

    fn mailbox_query(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let inner = self.inner.read();

        let mut found: Vec<&Record> = Vec::new();
        for mailbox in inner.mailboxes.values() {
            let keep = match args.record("filter") {
                Some(filter) => matches(filter, &|c: &Record| Ok(Self::mailbox_matches(c, mailbox)))?,
                None => true,
            };
            if keep {
                found.push(mailbox);
            }
        }
        sort_records(&mut found, args.list("sort").unwrap_or_default(), MAILBOX_SORTABLE)?;
        let ids = found
            .iter()
            .filter_map(|m| m.str("id"))
            .map(str::to_string)
            .collect();
        let page = window(ids, args)?;

        let mut response = Record::new(&self.schemas.mailbox_query_response)
            .with("account_id", self.account_id.as_str())?
            .with("query_state", inner.log.state().to_string())?
            .with("can_calculate_changes", false)?
            .with("position", as_count(page.position))?
            .with("ids", page.ids)?;
        if args.bool("calculate_total") == Some(true) {
            response.set("total", as_count(page.total))?;
        }
        Ok(response)
    }

    #[allow(clippy::too_many_lines)]
    fn mailbox_set(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let mut inner = self.inner.write();
        let old_state = self.check_state(&inner, args)?;
        let mut pending = Vec::new();

        let mut created = BTreeMap::new();
        let mut not_created = BTreeMap::new();
        if let Some(create) = args.map("create") {
            for (creation_id, draft) in create {
                let Some(draft) = draft.as_record() else {
                    continue;
                };
                if let Some(parent) = draft.str("parent_id") {
                    if !inner.mailboxes.contains_key(parent) {
                        not_created.insert(
                            creation_id.clone(),
                            self.invalid_properties(vec!["parentId".into()], format!("no mailbox {parent}"))?,
                        );
                        continue;
                    }
                }
                let id = inner.new_id("M");
                let mut mailbox = draft.clone();
                mailbox.set("id", id.as_str())?;
                inner.mailboxes.insert(id.clone(), mailbox);
                created.insert(
                    creation_id.clone(),
                    Value::Record(Record::new(&self.schemas.mailbox).with("id", id.as_str())?),
                );
                pending.push((ObjectType::Mailbox, id, ChangeKind::Created));
            }
        }

        let mut updated = BTreeMap::new();
        let mut not_updated = BTreeMap::new();
        if let Some(update) = args.map("update") {
            for (id, patch) in update {
                let Some(stored) = inner.mailboxes.get(id) else {
                    not_updated.insert(id.clone(), self.set_error("notFound", format!("no mailbox {id}"))?);
                    continue;
                };
                let Some(patch) = patch.as_raw().and_then(JsonValue::as_object) else {
                    not_updated.insert(id.clone(), self.set_error("invalidPatch", "patch must be an object")?);
                    continue;
                };
                match apply_patch(&self.marshaller, stored, patch) {
                    Ok(mailbox) => {
                        if let Some(parent) = mailbox.str("parent_id") {
                            if parent == id.as_str() || !inner.mailboxes.contains_key(parent) {
                                not_updated.insert(
                                    id.clone(),
                                    self.invalid_properties(vec!["parentId".into()], format!("invalid parent {parent}"))?,
                                );
                                continue;
                            }
                        }
                        inner.mailboxes.insert(id.clone(), mailbox);
                        updated.insert(id.clone(), Value::Null);
                        pending.push((ObjectType::Mailbox, id.clone(), ChangeKind::Updated));
                    }
                    Err(err) => {
                        not_updated.insert(id.clone(), self.invalid_properties(err.properties, err.description)?);
                    }
                }
            }
        }

        let remove_emails = args.bool("on_destroy_remove_emails") == Some(true);
        let mut destroyed = Vec::new();
        let mut not_destroyed = BTreeMap::new();
        for id in args.strings("destroy").unwrap_or_default() {
            if !inner.mailboxes.contains_key(id) {
                not_destroyed.insert(id.to_string(), self.set_error("notFound", format!("no mailbox {id}"))?);
                continue;
            }
            if inner.mailboxes.values().any(|m| m.str("parent_id") == Some(id)) {
                not_destroyed.insert(id.to_string(), self.set_error("mailboxHasChild", "mailbox has children")?);
                continue;
            }
            let members: Vec<String> = inner
                .emails
                .iter()
                .filter(|(_, e)| e.map("mailbox_ids").is_some_and(|m| m.contains_key(id)))
                .map(|(eid, _)| eid.clone())
                .collect();
            if !members.is_empty() && !remove_emails {
                not_destroyed.insert(id.to_string(), self.set_error("mailboxHasEmail", "mailbox is not empty")?);
                continue;
            }
            for email_id in members {
                let Some(email) = inner.emails.get_mut(&email_id) else {
                    continue;
                };
                let mut mailbox_ids = email.map("mailbox_ids").cloned().unwrap_or_default();
                mailbox_ids.remove(id);
                if mailbox_ids.is_empty() {
                    let thread_id = email.str("thread_id").unwrap_or_default().to_string();
                    inner.emails.remove(&email_id);
                    pending.push((ObjectType::Email, email_id, ChangeKind::Destroyed));
                    pending.push((ObjectType::Thread, thread_id, ChangeKind::Updated));
                } else {
                    email.set("mailbox_ids", Value::Map(mailbox_ids))?;
                    pending.push((ObjectType::Email, email_id, ChangeKind::Updated));
                }
            }
            inner.mailboxes.remove(id);
            destroyed.push(id.to_string());
            pending.push((ObjectType::Mailbox, id.to_string(), ChangeKind::Destroyed));
        }

        inner.commit(pending);
        debug!(
            created = created.len(),
            updated = updated.len(),
            destroyed = destroyed.len(),
            "Mailbox/set applied"
        );

        Ok(Record::new(&self.schemas.mailbox_set_response)
            .with("account_id", self.account_id.as_str())?
            .with("old_state", old_state)?
            .with("new_state", inner.log.state().to_string())?
            .with("created", Value::Map(created))?
            .with("updated", Value::Map(updated))?
            .with("destroyed", destroyed)?
            .with("not_created", Value::Map(not_created))?
            .with("not_updated", Value::Map(not_updated))?
            .with("not_destroyed", Value::Map(not_destroyed))?)
    }

    fn email_get(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let inner = self.inner.read();

        let ids = ids_arg(args).unwrap_or_else(|| inner.emails.keys().cloned().collect());
        let mut list = Vec::new();
        let mut not_found = Vec::new();
        for id in ids {
            match inner.emails.get(&id) {
                Some(email) => list.push(Value::Record(self.project_email(email, args)?)),
                None => not_found.push(id),
            }
        }

        Ok(Record::new(&self.schemas.email_get_response)
            .with("account_id", self.account_id.as_str())?
            .with("state", inner.log.state().to_string())?
            .with("list", list)?
            .with("not_found", not_found)?)
    }

    fn email_query(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let inner = self.inner.read();

        let mut found: Vec<&Record> = Vec::new();
        for email in inner.emails.values() {
            let keep = match args.record("filter") {
                Some(filter) => matches(filter, &|c: &Record| Ok(Self::email_matches(c, email)))?,
                None => true,
            };
            if keep {
                found.push(email);
            }
        }
        sort_records(&mut found, args.list("sort").unwrap_or_default(), EMAIL_SORTABLE)?;

        let collapse = args.bool("collapse_threads") == Some(true);
        let mut seen_threads = BTreeSet::new();
        let ids = found
            .iter()
            .filter(|e| !collapse || seen_threads.insert(e.str("thread_id").unwrap_or_default()))
            .filter_map(|e| e.str("id"))
            .map(str::to_string)
            .collect();
        let page = window(ids, args)?;

        let mut response = Record::new(&self.schemas.email_query_response)
            .with("account_id", self.account_id.as_str())?
            .with("query_state", inner.log.state().to_string())?
            .with("can_calculate_changes", false)?
            .with("position", as_count(page.position))?
            .with("ids", page.ids)?
            .with("collapse_threads", collapse)?;
        if args.bool("calculate_total") == Some(true) {
            response.set("total", as_count(page.total))?;
        }
        Ok(response)
    }

    #[allow(clippy::too_many_lines)]
    fn email_set(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let mut inner = self.inner.write();
        let old_state = self.check_state(&inner, args)?;
        let mut pending = Vec::new();

        let mut created = BTreeMap::new();
        let mut not_created = BTreeMap::new();
        if let Some(create) = args.map("create") {
            for (creation_id, draft) in create {
                let Some(draft) = draft.as_record() else {
                    continue;
                };
                match self.create_email(&mut inner, draft, &mut pending)? {
                    Ok(record) => {
                        created.insert(creation_id.clone(), Value::Record(record));
                    }
                    Err(set_error) => {
                        not_created.insert(creation_id.clone(), set_error);
                    }
                }
            }
        }

        let mut updated = BTreeMap::new();
        let mut not_updated = BTreeMap::new();
        if let Some(update) = args.map("update") {
            for (id, patch) in update {
                let Some(stored) = inner.emails.get(id) else {
                    not_updated.insert(id.clone(), self.set_error("notFound", format!("no email {id}"))?);
                    continue;
                };
                let Some(patch) = patch.as_raw().and_then(JsonValue::as_object) else {
                    not_updated.insert(id.clone(), self.set_error("invalidPatch", "patch must be an object")?);
                    continue;
                };
                let email = match apply_patch(&self.marshaller, stored, patch) {
                    Ok(email) => email,
                    Err(err) => {
                        not_updated.insert(id.clone(), self.invalid_properties(err.properties, err.description)?);
                        continue;
                    }
                };
                let before: BTreeSet<String> = stored
                    .map("mailbox_ids")
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default();
                let after: BTreeSet<String> = email
                    .map("mailbox_ids")
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default();
                if after.is_empty() || after.iter().any(|m| !inner.mailboxes.contains_key(m)) {
                    not_updated.insert(
                        id.clone(),
                        self.invalid_properties(vec!["mailboxIds".into()], "invalid mailboxIds")?,
                    );
                    continue;
                }
                pending.extend(
                    before
                        .symmetric_difference(&after)
                        .map(|m| (ObjectType::Mailbox, m.clone(), ChangeKind::Updated)),
                );
                if stored.get("keywords") != email.get("keywords") {
                    pending.extend(after.iter().map(|m| (ObjectType::Mailbox, m.clone(), ChangeKind::Updated)));
                }
                inner.emails.insert(id.clone(), email);
                updated.insert(id.clone(), Value::Null);
                pending.push((ObjectType::Email, id.clone(), ChangeKind::Updated));
            }
        }

        let mut destroyed = Vec::new();
        let mut not_destroyed = BTreeMap::new();
        for id in args.strings("destroy").unwrap_or_default() {
            let Some(email) = inner.emails.remove(id) else {
                not_destroyed.insert(id.to_string(), self.set_error("notFound", format!("no email {id}"))?);
                continue;
            };
            let thread_id = email.str("thread_id").unwrap_or_default().to_string();
            let thread_left = inner
                .emails
                .values()
                .any(|e| e.str("thread_id") == Some(thread_id.as_str()));
            let thread_change = if thread_left {
                ChangeKind::Updated
            } else {
                ChangeKind::Destroyed
            };
            pending.push((ObjectType::Thread, thread_id, thread_change));
            if let Some(mailboxes) = email.map("mailbox_ids") {
                pending.extend(
                    mailboxes
                        .keys()
                        .map(|m| (ObjectType::Mailbox, m.clone(), ChangeKind::Updated)),
                );
            }
            pending.push((ObjectType::Email, id.to_string(), ChangeKind::Destroyed));
            destroyed.push(id.to_string());
        }

        inner.commit(pending);
        debug!(
            created = created.len(),
            updated = updated.len(),
            destroyed = destroyed.len(),
            "Email/set applied"
        );

        Ok(Record::new(&self.schemas.email_set_response)
            .with("account_id", self.account_id.as_str())?
            .with("old_state", old_state)?
            .with("new_state", inner.log.state().to_string())?
            .with("created", Value::Map(created))?
            .with("updated", Value::Map(updated))?
            .with("destroyed", destroyed)?
            .with("not_created", Value::Map(not_created))?
            .with("not_updated", Value::Map(not_updated))?
            .with("not_destroyed", Value::Map(not_destroyed))?)
    }

    fn thread_get(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let inner = self.inner.read();
        let threads = inner.threads();

        let ids = ids_arg(args).unwrap_or_else(|| threads.keys().cloned().collect());
        let mut list = Vec::new();
        let mut not_found = Vec::new();
        for id in ids {
            let Some(emails) = threads.get(&id) else {
                not_found.push(id);
                continue;
            };
            let email_ids: Vec<&str> = emails.iter().filter_map(|e| e.str("id")).collect();
            list.push(Value::Record(
                Record::new(&self.schemas.thread)
                    .with("id", id.as_str())?
                    .with("email_ids", email_ids)?,
            ));
        }

        Ok(Record::new(&self.schemas.thread_get_response)
            .with("account_id", self.account_id.as_str())?
            .with("state", inner.log.state().to_string())?
            .with("list", list)?
            .with("not_found", not_found)?)
    }

    fn thread_changes(&self, _ctx: &RequestContext, args: &Record) -> Result<Record, ModuleError> {
        self.check_account(args)?;
        let inner = self.inner.read();
        let max = args.int("max_changes").and_then(|n| usize::try_from(n).ok());
        let changes = inner
            .log
            .since(ObjectType::Thread, args.str("since_state").unwrap_or_default(), max)
            .map_err(|e| changes_error(&e))?;

        Ok(Record::new(&self.schemas.thread_changes_response)
            .with("account_id", self.account_id.as_str())?
            .with("old_state", changes.old_state.to_string())?
            .with("new_state", changes.new_state.to_string())?
            .with("has_more_changes", changes.has_more_changes)?
            .with("created", changes.created)?
            .with("updated", changes.updated)?
            .with("destroyed", changes.destroyed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jmap_core::models::HeaderSchemas;
    use jmap_core::{MethodErrorKind, SchemaRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> MemoryMailStore {
        store_with(&Fixture::sample())
    }

    fn store_with(fixture: &Fixture) -> MemoryMailStore {
        let core = CoreSchemas::new().unwrap();
        let headers = HeaderSchemas::new().unwrap();
        let mail = MailSchemas::new(&core, &headers).unwrap();
        let mut registry = SchemaRegistry::new();
        core.register(&mut registry).unwrap();
        mail.register(&mut registry).unwrap();
        let store = MemoryMailStore::new("a1", Marshaller::new(Arc::new(registry)), &core, &mail);
        store.load(fixture).unwrap();
        store
    }

    fn args(store: &MemoryMailStore, schema: &Arc<jmap_core::Schema>, raw: JsonValue) -> Record {
        store.marshaller.unmarshal(schema, View::Client, &raw).unwrap()
    }

    fn json_of(store: &MemoryMailStore, record: &Record) -> JsonValue {
        store.marshaller.marshal(record, View::Server).unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new("test")
    }

    fn method_kind(err: ModuleError) -> MethodErrorKind {
        match err {
            ModuleError::Method(err) => err.kind,
            ModuleError::NotImplemented => panic!("expected method error"),
        }
    }

    #[test]
    fn fixture_load_sets_state() {
        let s = store();
        assert_eq!(s.state(), "1");
    }

    #[test]
    fn mailbox_get_computes_counters() {
        let s = store();
        let a = args(&s, &s.schemas.mailbox_get_args, json!({"accountId": "a1", "ids": ["inbox", "nope"]}));
        let out = json_of(&s, &s.mailbox_get(&ctx(), &a).unwrap());
        let inbox = &out["list"][0];
        assert_eq!(inbox["totalEmails"], 2);
        assert_eq!(inbox["unreadEmails"], 1);
        assert_eq!(inbox["totalThreads"], 1);
        assert_eq!(inbox["unreadThreads"], 1);
        assert_eq!(inbox["myRights"]["mayReadItems"], true);
        assert_eq!(out["notFound"], json!(["nope"]));
    }

    #[test]
    fn mailbox_get_honours_properties() {
        let s = store();
        let a = args(
            &s,
            &s.schemas.mailbox_get_args,
            json!({"accountId": "a1", "ids": ["archive"], "properties": ["name"]}),
        );
        let out = json_of(&s, &s.mailbox_get(&ctx(), &a).unwrap());
        assert_eq!(out["list"][0], json!({"id": "archive", "name": "Archive"}));
    }

    #[test]
    fn wrong_account_is_rejected() {
        let s = store();
        let a = args(&s, &s.schemas.mailbox_get_args, json!({"accountId": "zz"}));
        assert_eq!(method_kind(s.mailbox_get(&ctx(), &a).unwrap_err()), MethodErrorKind::AccountNotFound);
    }

    #[test]
    fn mailbox_query_filters_and_sorts() {
        let s = store();
        let a = args(
            &s,
            &s.schemas.mailbox_query_args,
            json!({
                "accountId": "a1",
                "filter": {"operator": "NOT", "conditions": [{"hasAnyRole": true}]},
                "calculateTotal": true,
            }),
        );
        let out = json_of(&s, &s.mailbox_query(&ctx(), &a).unwrap());
        assert_eq!(out["ids"], json!(["projects"]));
        assert_eq!(out["total"], 1);

        let a = args(
            &s,
            &s.schemas.mailbox_query_args,
            json!({"accountId": "a1", "sort": [{"property": "sortOrder", "isAscending": false}]}),
        );
        let out = json_of(&s, &s.mailbox_query(&ctx(), &a).unwrap());
        assert_eq!(out["ids"], json!(["projects", "archive", "inbox"]));
        assert!(out.get("total").is_none());
    }

    #[test]
    fn email_query_by_mailbox_and_keyword() {
        let s = store();
        let a = args(
            &s,
            &s.schemas.email_query_args,
            json!({
                "accountId": "a1",
                "filter": {"operator": "AND", "conditions": [
                    {"inMailbox": "inbox"},
                    {"notKeyword": "$seen"},
                ]},
            }),
        );
        let out = json_of(&s, &s.email_query(&ctx(), &a).unwrap());
        assert_eq!(out["ids"], json!(["e2"]));
    }

    #[test]
    fn email_query_collapses_threads() {
        let s = store();
        let a = args(
            &s,
            &s.schemas.email_query_args,
            json!({
                "accountId": "a1",
                "sort": [{"property": "receivedAt", "isAscending": false}],
                "collapseThreads": true,
            }),
        );
        let out = json_of(&s, &s.email_query(&ctx(), &a).unwrap());
        assert_eq!(out["ids"], json!(["e2"]));
        assert_eq!(out["collapseThreads"], true);
    }

    #[test]
    fn email_get_projects_properties_and_headers() {
        let s = store();
        let a = args(
            &s,
            &s.schemas.email_get_args,
            json!({
                "accountId": "a1",
                "ids": ["e1"],
                "properties": ["subject", "from", "header:X-Mailer:asText", "header:Missing"],
            }),
        );
        let out = json_of(&s, &s.email_get(&ctx(), &a).unwrap());
        let email = &out["list"][0];
        assert_eq!(email["id"], "e1");
        assert_eq!(email["subject"], "Quarterly report");
        assert_eq!(email["from"][0]["email"], "alice@example.com");
        assert_eq!(email["header:X-Mailer:asText"], "fixture");
        assert_eq!(email["header:Missing"], JsonValue::Null);
        assert!(email.get("size").is_none());
    }

    #[test]
    fn email_set_create_update_destroy() {
        let s = store();
        let a = args(
            &s,
            &s.schemas.email_set_args,
            json!({
                "accountId": "a1",
                "ifInState": "1",
                "create": {
                    "k1": {"mailboxIds": {"archive": true}, "subject": "draft"},
                    "k2": {"mailboxIds": {}, "subject": "nowhere"},
                },
                "update": {"e1": {"keywords/$flagged": true}, "e9": {"subject": "x"}},
                "destroy": ["e2"],
            }),
        );
        let out = json_of(&s, &s.email_set(&ctx(), &a).unwrap());
        assert_eq!(out["oldState"], "1");
        assert_eq!(out["newState"], "2");
        let created_id = out["created"]["k1"]["id"].as_str().unwrap().to_string();
        assert!(out["created"]["k1"]["threadId"].is_string());
        assert_eq!(out["notCreated"]["k2"]["type"], "invalidProperties");
        assert_eq!(out["updated"], json!({"e1": null}));
        assert_eq!(out["notUpdated"]["e9"]["type"], "notFound");
        assert_eq!(out["destroyed"], json!(["e2"]));

        let changes_args = args(
            &s,
            &s.schemas.mailbox_changes_args,
            json!({"accountId": "a1", "sinceState": "1"}),
        );
        let changes = json_of(&s, &s.mailbox_changes(&ctx(), &changes_args).unwrap());
        let updated = changes["updated"].as_array().unwrap();
        assert!(updated.contains(&json!("archive")));
        assert!(updated.contains(&json!("inbox")));

        let email_changes = s
            .inner
            .read()
            .log
            .since(ObjectType::Email, "1", None)
            .unwrap();
        assert_eq!(email_changes.created, vec![created_id]);
        assert_eq!(email_changes.updated, vec!["e1"]);
        assert_eq!(email_changes.destroyed, vec!["e2"]);
    }

    #[test]
    fn email_set_state_mismatch() {
        let s = store();
        let a = args(&s, &s.schemas.email_set_args, json!({"accountId": "a1", "ifInState": "7"}));
        assert_eq!(method_kind(s.email_set(&ctx(), &a).unwrap_err()), MethodErrorKind::StateMismatch);
    }

    #[test]
    fn mailbox_destroy_rules() {
        let s = store();
        let a = args(
            &s,
            &s.schemas.mailbox_set_args,
            json!({"accountId": "a1", "destroy": ["inbox", "archive", "projects"]}),
        );
        let out = json_of(&s, &s.mailbox_set(&ctx(), &a).unwrap());
        assert_eq!(out["notDestroyed"]["inbox"]["type"], "mailboxHasEmail");
        assert_eq!(out["notDestroyed"]["archive"]["type"], "mailboxHasChild");
        assert_eq!(out["destroyed"], json!(["projects"]));

        let a = args(
            &s,
            &s.schemas.mailbox_set_args,
            json!({"accountId": "a1", "destroy": ["inbox"], "onDestroyRemoveEmails": true}),
        );
        let out = json_of(&s, &s.mailbox_set(&ctx(), &a).unwrap());
        assert_eq!(out["destroyed"], json!(["inbox"]));
        assert!(s.inner.read().emails.is_empty());
    }

    #[test]
    fn thread_get_and_changes() {
        let s = store();
        let a = args(&s, &s.schemas.thread_get_args, json!({"accountId": "a1", "ids": ["t1"]}));
        let out = json_of(&s, &s.thread_get(&ctx(), &a).unwrap());
        assert_eq!(out["list"][0]["emailIds"], json!(["e1", "e2"]));

        let a = args(
            &s,
            &s.schemas.thread_changes_args,
            json!({"accountId": "a1", "sinceState": "0"}),
        );
        let out = json_of(&s, &s.thread_changes(&ctx(), &a).unwrap());
        assert_eq!(out["created"], json!(["t1"]));

        let a = args(
            &s,
            &s.schemas.thread_changes_args,
            json!({"accountId": "a1", "sinceState": "42"}),
        );
        assert_eq!(
            method_kind(s.thread_changes(&ctx(), &a).unwrap_err()),
            MethodErrorKind::CannotCalculateChanges
        );
    }

    #[test]
    fn thread_emails_follow_received_at() {
        let mut fixture = Fixture::sample();
        fixture.emails[0]["receivedAt"] = json!("2024-03-05T09:00:00Z");
        let s = store_with(&fixture);
        let a = args(&s, &s.schemas.thread_get_args, json!({"accountId": "a1", "ids": ["t1"]}));
        let out = json_of(&s, &s.thread_get(&ctx(), &a).unwrap());
        assert_eq!(out["list"][0]["emailIds"], json!(["e2", "e1"]));
    }

    #[test]
    fn body_values_follow_fetch_flags() {
        let core = CoreSchemas::new().unwrap();
        let headers = HeaderSchemas::new().unwrap();
        let mail = MailSchemas::new(&core, &headers).unwrap();
        let mut registry = SchemaRegistry::new();
        core.register(&mut registry).unwrap();
        mail.register(&mut registry).unwrap();
        let s = MemoryMailStore::new("a1", Marshaller::new(Arc::new(registry)), &core, &mail);
        s.load(&Fixture {
            mailboxes: vec![json!({"id": "inbox", "name": "Inbox"})],
            emails: vec![json!({
                "id": "e1",
                "blobId": "b1",
                "threadId": "t1",
                "mailboxIds": {"inbox": true},
                "textBody": [{"partId": "1", "type": "text/plain", "size": 11}],
                "htmlBody": [{"partId": "2", "type": "text/html"}],
                "bodyValues": {
                    "1": {"value": "hello world"},
                    "2": {"value": "<p>hello</p>"},
                },
            })],
        })
        .unwrap();

        let a = args(
            &s,
            &s.schemas.email_get_args,
            json!({
                "accountId": "a1",
                "properties": ["bodyValues", "textBody"],
                "bodyProperties": ["partId"],
                "fetchTextBodyValues": true,
                "maxBodyValueBytes": 5,
            }),
        );
        let out = json_of(&s, &s.email_get(&ctx(), &a).unwrap());
        let email = &out["list"][0];
        assert_eq!(
            email["bodyValues"],
            json!({"1": {"value": "hello", "isTruncated": true}})
        );
        assert_eq!(email["textBody"], json!([{"partId": "1"}]));
    }
}
