//! Mail storage for the JMAP server.
//!
//! - [`MemoryMailStore`]: the in-memory [`MailBackend`](jmap_core::modules::MailBackend)
//!   loaded from a [`Fixture`]
//! - [`ChangeLog`]: state counter and change history behind `/changes`
//! - [`query`]: filter, sort and window helpers behind `/query`
//! - [`patch`]: `/set` update patches

pub mod changes;
pub mod memory;
pub mod patch;
pub mod query;

pub use changes::{ChangeKind, ChangeLog, Changes, ChangesError, ObjectType};
pub use memory::{Fixture, MemoryMailStore};
pub use patch::{apply_patch, PatchError};
