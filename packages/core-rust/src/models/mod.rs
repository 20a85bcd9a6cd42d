//! Concrete schemas: core objects, header queries, the standard method
//! shapes and the mail capability.

pub mod core;
pub mod headers;
pub mod mail;
pub mod standard;

pub use self::core::{CoreSchemas, CALENDARS_URN, CONTACTS_URN, CORE_URN, MAIL_URN};
pub use headers::{HeaderQuery, HeaderSchemas};
pub use mail::MailSchemas;
