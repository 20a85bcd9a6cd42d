//! HTTP handler definitions for the JMAP server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for building the router.

pub mod api;
pub mod events;
pub mod health;
pub mod session;

pub use api::api_handler;
pub use events::events_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use session::session_handler;

use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;

use super::middleware::REQUEST_ID_HEADER;
use super::ShutdownController;
use crate::service::JmapService;

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// The JMAP service answering API and session requests.
    pub service: Arc<JmapService>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// The `x-request-id` set by the middleware, or a fresh one when the handler
/// runs without it (as in router tests).
pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}
