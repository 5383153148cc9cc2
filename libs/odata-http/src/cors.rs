use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

/// CORS layer for the listed origins; `None` when the list is empty.
///
/// `"*"` allows any origin.
#[must_use]
pub fn build_cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }

    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([axum::http::header::LOCATION]);

    if allowed_origins.iter().any(|o| o == "*") {
        warn!("CORS is configured with allowed_origins=['*']; any website may call the service");
        return Some(layer.allow_origin(Any));
    }

    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|s| axum::http::HeaderValue::from_str(s).ok())
        .collect();
    Some(layer.allow_origin(origins))
}
