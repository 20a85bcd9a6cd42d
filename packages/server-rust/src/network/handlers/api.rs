//! The JMAP API endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::{debug, error, warn};

use jmap_core::RequestError;

use super::{request_id, AppState};

const PROBLEM_JSON: &str = "application/problem+json";

/// Runs one JMAP request body through the executor.
///
/// The batch runs on the blocking pool. Request-level errors are answered
/// with their problem-details body and status; method errors are part of a
/// normal 200 response.
pub async fn api_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.shutdown.is_draining() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let _guard = state.shutdown.in_flight_guard();

    let request_id = request_id(&headers);
    let service = Arc::clone(&state.service);
    let id = request_id.clone();
    let result = tokio::task::spawn_blocking(move || service.handle(&body, &id)).await;

    match result {
        Ok(Ok(response)) => {
            debug!(
                request_id = %request_id,
                responses = response.method_responses.len(),
                "API request handled"
            );
            Json(response.to_json()).into_response()
        }
        Ok(Err(err)) => {
            warn!(request_id = %request_id, kind = %err.kind, detail = %err.detail, "request rejected");
            request_error_response(&err)
        }
        Err(err) => {
            error!(request_id = %request_id, error = %err, "API request task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Problem-details response for a request-level error.
pub(crate) fn request_error_response(err: &RequestError) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::BAD_REQUEST);
    (
        status,
        [(header::CONTENT_TYPE, PROBLEM_JSON)],
        err.to_json().to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jmap_core::RequestErrorKind;

    #[test]
    fn request_errors_use_their_status_and_problem_json() {
        let err = RequestError::not_json("expected value at line 1 column 1");
        let response = request_error_response(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_JSON
        );
        assert_eq!(err.kind, RequestErrorKind::NotJson);
    }
}
