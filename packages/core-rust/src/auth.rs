//! Account lookup and read-permission checks.

use std::collections::BTreeMap;

use crate::context::RequestContext;
use crate::record::Record;

/// The object id(s) a permission check is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceIds<'a> {
    One(&'a str),
    Many(&'a [&'a str]),
}

impl<'a> ResourceIds<'a> {
    pub fn iter(&self) -> impl Iterator<Item = &'a str> + '_ {
        let slice: &[&'a str] = match self {
            Self::One(id) => std::slice::from_ref(id),
            Self::Many(ids) => *ids,
        };
        slice.iter().copied()
    }
}

/// Source of the accounts visible to a request, plus permission checks.
pub trait AccountBackend: Send + Sync {
    /// Accounts the request's principal can see, keyed by account id.
    /// Values are `Account` records.
    fn accounts_for(&self, ctx: &RequestContext) -> BTreeMap<String, Record>;

    /// Whether the principal may read `ids` of `resource_type`.
    /// Denies by default.
    fn can_read(&self, _ctx: &RequestContext, _resource_type: &str, _ids: ResourceIds<'_>) -> bool {
        false
    }
}

/// Fixed account list per username.
///
/// A principal may read an `Account` it owns; every other resource type is
/// readable once the account check passed.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    accounts: BTreeMap<String, BTreeMap<String, Record>>,
}

impl StaticAccounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `username` access to `account`.
    pub fn insert(&mut self, username: impl Into<String>, account_id: impl Into<String>, account: Record) {
        self.accounts
            .entry(username.into())
            .or_default()
            .insert(account_id.into(), account);
    }

    #[must_use]
    pub fn with_account(
        mut self,
        username: impl Into<String>,
        account_id: impl Into<String>,
        account: Record,
    ) -> Self {
        self.insert(username, account_id, account);
        self
    }
}

impl AccountBackend for StaticAccounts {
    fn accounts_for(&self, ctx: &RequestContext) -> BTreeMap<String, Record> {
        ctx.username()
            .and_then(|user| self.accounts.get(user))
            .cloned()
            .unwrap_or_default()
    }

    fn can_read(&self, ctx: &RequestContext, resource_type: &str, ids: ResourceIds<'_>) -> bool {
        let Some(owned) = ctx.username().and_then(|user| self.accounts.get(user)) else {
            return false;
        };
        match resource_type {
            "Account" => ids.iter().all(|id| owned.contains_key(id)),
            _ => true,
        }
    }
}
