//! Placeholder for the event source endpoint advertised in the session.

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value as JsonValue};

/// Push delivery is not served; answers 501.
pub async fn events_handler() -> (StatusCode, Json<JsonValue>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({
            "status": 501,
            "detail": "event source is not available on this server",
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_not_implemented() {
        let (status, body) = events_handler().await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body.0["status"], 501);
    }
}
