#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! axum transport for [`odata_core`].
//!
//! The whole path space is handed to [`ODataService::handle`] through a
//! fallback handler; errors become RFC 9457 [`Problem`] responses.

use std::sync::Arc;

use axum::Router;
use odata_core::ODataService;
use tower_http::trace::TraceLayer;
use tracing::field::Empty;

pub mod cors;
pub mod error;
pub mod handler;
pub mod problem;

pub use error::{error_to_problem, status_of};
pub use handler::{ODATA_JSON, dispatch};
pub use problem::{APPLICATION_PROBLEM_JSON, Problem};

/// Router serving `service`, with request tracing and optional CORS.
#[must_use]
pub fn router(service: Arc<ODataService>, cors_origins: &[String]) -> Router {
    let mut router = Router::new().fallback(dispatch).with_state(service);

    if let Some(cors) = cors::build_cors_layer(cors_origins) {
        router = router.layer(cors);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &axum::http::Request<axum::body::Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %req.method(),
                    uri = %req.uri().path(),
                    status = Empty,
                    latency_ms = Empty,
                )
            })
            .on_response(
                |res: &axum::http::Response<axum::body::Body>,
                 latency: std::time::Duration,
                 span: &tracing::Span| {
                    span.record("status", res.status().as_u16());
                    span.record("latency_ms", latency.as_millis());
                },
            ),
    )
}
