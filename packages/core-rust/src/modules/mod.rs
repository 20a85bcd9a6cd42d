//! Modules shipped with the core: `Core/echo` and the mail methods.

pub mod core;
pub mod mail;

pub use self::core::CoreModule;
pub use mail::{MailBackend, MailModule};
