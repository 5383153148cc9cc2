use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::Error;
use crate::Record;
use crate::limits::QueryLimits;
use crate::query::QueryParams;
use crate::schema::{CollectionDescriptor, EntityDescriptor, NavigationEdge, SchemaRegistry};
use crate::storage::Store;

/// Request-scoped state.
///
/// Created empty at request start, filled in by the router (collection,
/// backend handle, key, navigation edge) and the query parser, then read by
/// the service, the builder and custom operation handlers.
pub struct RequestContext {
    pub base_url: String,
    pub route_prefix: String,
    pub registry: Arc<SchemaRegistry>,
    pub limits: QueryLimits,
    pub collection: Option<Arc<CollectionDescriptor>>,
    pub store: Option<Arc<dyn Store>>,
    pub key: Option<Value>,
    /// Key as it appeared in the path, e.g. `42` or `'abc'`.
    pub key_literal: Option<String>,
    pub navigation: Option<NavigationEdge>,
    pub query: QueryParams,
}

impl RequestContext {
    /// `base_url` loses any trailing slash; `route_prefix` is normalized to
    /// `/segment` form (or empty).
    #[must_use]
    pub fn new(
        registry: Arc<SchemaRegistry>,
        base_url: impl Into<String>,
        route_prefix: impl AsRef<str>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            base_url,
            route_prefix: normalize_prefix(route_prefix.as_ref()),
            registry,
            limits: QueryLimits::default(),
            collection: None,
            store: None,
            key: None,
            key_literal: None,
            navigation: None,
            query: QueryParams::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// `{base}{route}`
    #[must_use]
    pub fn service_root(&self) -> String {
        format!("{}{}", self.base_url, self.route_prefix)
    }

    #[must_use]
    pub fn metadata_url(&self) -> String {
        format!("{}/$metadata", self.service_root())
    }

    /// `{base}{route}/{collection}({key})`, quoting string-like keys.
    #[must_use]
    pub fn entity_id(&self, collection: &str, entity: &EntityDescriptor, record: &Record) -> String {
        let key = record.get(entity.key()).unwrap_or(&Value::Null);
        format!(
            "{}/{}({})",
            self.service_root(),
            collection,
            entity.key_type().key_literal(key)
        )
    }

    /// The collection resolved by the router.
    ///
    /// # Errors
    /// `Error::RouteNotFound` if the router has not bound a collection.
    pub fn collection(&self) -> Result<&Arc<CollectionDescriptor>, Error> {
        self.collection.as_ref().ok_or_else(|| self.unrouted())
    }

    /// # Errors
    /// `Error::RouteNotFound` if the router has not bound a backend handle.
    pub fn store(&self) -> Result<&Arc<dyn Store>, Error> {
        self.store.as_ref().ok_or_else(|| self.unrouted())
    }

    /// # Errors
    /// `Error::RouteNotFound` if the path carried no key.
    pub fn key(&self) -> Result<&Value, Error> {
        self.key.as_ref().ok_or_else(|| self.unrouted())
    }

    /// # Errors
    /// `Error::RouteNotFound` if no navigation edge was matched.
    pub fn navigation(&self) -> Result<&NavigationEdge, Error> {
        self.navigation.as_ref().ok_or_else(|| self.unrouted())
    }

    #[must_use]
    pub fn key_display(&self) -> String {
        self.key_literal.clone().unwrap_or_default()
    }

    fn unrouted(&self) -> Error {
        Error::RouteNotFound {
            method: String::new(),
            path: self.service_root(),
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("base_url", &self.base_url)
            .field("route_prefix", &self.route_prefix)
            .field("collection", &self.collection.as_ref().map(|c| c.name().to_owned()))
            .field("key", &self.key)
            .field("navigation", &self.navigation.as_ref().map(|n| n.name().to_owned()))
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// `odata/` → `/odata`, `/` → ``.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
