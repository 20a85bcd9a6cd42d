//! JMAP server: axum HTTP wrapper, session resource and an in-memory mail
//! store on top of `jmap-core`.

pub mod network;
pub mod service;
pub mod storage;

pub use network::{NetworkConfig, NetworkModule};
pub use service::{JmapService, ServerConfig};
pub use storage::{Fixture, MemoryMailStore};
