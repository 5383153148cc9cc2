use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, Uri, header};
use axum::response::{IntoResponse, Response};
use odata_core::{Error, ODataRequest, ODataResponse, ODataService, Payload};
use serde_json::Value;

use crate::error::error_to_problem;
use crate::problem::Problem;

pub const ODATA_JSON: &str = "application/json;odata.metadata=minimal";
pub const ODATA_VERSION: HeaderName = HeaderName::from_static("odata-version");

/// Fallback handler: every path under the router goes through the engine.
///
/// # Errors
/// Engine failures and malformed bodies, rendered as `application/problem+json`.
pub async fn dispatch(
    State(service): State<Arc<ODataService>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Result<Response, Problem> {
    let path = uri.path().to_owned();
    let body = parse_body(&body).map_err(|e| error_to_problem(&e, &path))?;

    let mut request =
        ODataRequest::new(method, path.as_str()).with_query(uri.query().unwrap_or_default());
    request.body = body;

    let response = service
        .handle(request)
        .await
        .map_err(|e| error_to_problem(&e, &path))?;
    Ok(into_http(response))
}

fn parse_body(bytes: &[u8]) -> Result<Option<Value>, Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| Error::InvalidBody(format!("malformed JSON: {e}")))
}

fn into_http(response: ODataResponse) -> Response {
    let mut out = match response.payload {
        Payload::Json(value) => {
            let mut r = axum::Json(value).into_response();
            r.headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(ODATA_JSON));
            r
        }
        Payload::Text(text) => text.into_response(),
        Payload::Empty => ().into_response(),
    };
    *out.status_mut() = response.status;

    let headers = out.headers_mut();
    headers.insert(ODATA_VERSION, HeaderValue::from_static("4.0"));
    if let Some(location) = response.location.as_deref()
        && let Ok(value) = HeaderValue::from_str(location)
    {
        headers.insert(header::LOCATION, value);
    }
    out
}
