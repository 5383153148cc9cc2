//! `odata_core::Error` → RFC 9457 Problem.

use http::StatusCode;
use odata_core::{Error, StoreError};

use crate::problem::Problem;

#[inline]
fn current_trace_id() -> Option<String> {
    tracing::Span::current()
        .id()
        .map(|id| id.into_u64().to_string())
}

/// HTTP status for an engine error.
#[must_use]
pub fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::MalformedFilter(_)
        | Error::FilterParse { .. }
        | Error::InvalidOrderBy { .. }
        | Error::InvalidSelect { .. }
        | Error::InvalidPaging { .. }
        | Error::InvalidExpand { .. }
        | Error::InvalidQuery { .. }
        | Error::NavigationNotFound { .. }
        | Error::InvalidKey { .. }
        | Error::InvalidBody(_)
        | Error::Storage {
            source: StoreError::Invalid(_),
            ..
        } => StatusCode::BAD_REQUEST,
        Error::RouteNotFound { .. }
        | Error::EntityNotFound { .. }
        | Error::Storage {
            source: StoreError::NotFound { .. },
            ..
        } => StatusCode::NOT_FOUND,
        Error::Storage {
            source: StoreError::Conflict { .. },
            ..
        } => StatusCode::CONFLICT,
        Error::Storage {
            source: StoreError::Backend(_),
            ..
        }
        | Error::OperationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Problem for `err` on request path `instance`, tagged with the current
/// span id. Server-side failures are logged and their detail is withheld.
pub fn error_to_problem(err: &Error, instance: &str) -> Problem {
    let status = status_of(err);
    let title = status.canonical_reason().unwrap_or("Error");

    let detail = if status.is_server_error() {
        tracing::error!(error = %err, code = err.code(), instance, "request failed");
        match err {
            Error::OperationFailed { name, .. } => format!("operation '{name}' failed"),
            Error::Storage { collection, .. } => {
                format!("storage backend for '{collection}' is unavailable")
            }
            _ => "internal error".to_owned(),
        }
    } else {
        tracing::debug!(error = %err, code = err.code(), instance, "request rejected");
        err.to_string()
    };

    let mut problem = Problem::new(status, title, detail)
        .with_code(err.code())
        .with_instance(instance);
    if let Some(tid) = current_trace_id() {
        problem = problem.with_trace_id(tid);
    }
    problem
}
