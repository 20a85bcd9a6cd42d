//! The session resource at `/.well-known/jmap`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use super::{request_id, AppState};

/// Returns the session object for the configured user.
pub async fn session_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = request_id(&headers);
    match state.service.session(&request_id) {
        Ok(session) => Json(session).into_response(),
        Err(err) => {
            error!(request_id = %request_id, error = %err, "failed to build session resource");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
