//! Dispatch failures and how they reach the client.

use std::error::Error as StdError;

use axum::http::StatusCode;
use thiserror::Error;

use crate::http::ResponseWriter;
use crate::session::SessionError;

/// Body sent with every 500 response. Underlying causes are only logged.
pub const UNAVAILABLE_MESSAGE: &str =
    "The system services are temporarily unavailable at the moment.";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("could not find route")]
    NoRoute,

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoRoute => StatusCode::NOT_FOUND,
            DispatchError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Write the client-facing form of `error`: a bare 404 for a missing
/// route, the fixed unavailable message with 500 for anything else.
pub(crate) fn write_error(writer: &ResponseWriter, error: &DispatchError) {
    match error.status() {
        StatusCode::INTERNAL_SERVER_ERROR => write_unavailable(writer),
        status => writer.write_header(status),
    }
}

/// 500 with the fixed unavailable message.
pub(crate) fn write_unavailable(writer: &ResponseWriter) {
    writer.write_header(StatusCode::INTERNAL_SERVER_ERROR);
    writer.write(UNAVAILABLE_MESSAGE);
}

/// Render an error with its whole `source()` chain for logs.
pub(crate) fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_failure_hides_cause() {
        let writer = ResponseWriter::new();
        let error = DispatchError::from(SessionError::new(
            "unable to get session",
            "redis: connection refused",
        ));
        write_error(&writer, &error);

        let response = writer.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], UNAVAILABLE_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn test_no_route_has_empty_body() {
        let writer = ResponseWriter::new();
        write_error(&writer, &DispatchError::NoRoute);

        let response = writer.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let error = DispatchError::from(SessionError::new(
            "unable to get session",
            "redis: connection refused",
        ));
        assert_eq!(
            error_chain(&error),
            "unable to get session: redis: connection refused"
        );
    }
}
