#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `OData`-style query and routing engine.
//!
//! Typed collections are registered in a [`SchemaRegistry`]; the [`router`]
//! turns a verb and path into an [`Operation`], the [`parser`] turns the query
//! string into [`QueryParams`], a [`Store`] executes the [`Predicate`], and the
//! [`builder`] assembles nested wire objects, expanding navigation edges level
//! by level. [`ODataService`] ties the pieces together for a transport.

pub mod builder;
pub mod context;
pub mod expand;
pub mod filter;
pub mod limits;
pub mod metadata;
pub mod navigation;
pub mod operation;
pub mod parser;
pub mod query;
pub mod router;
pub mod schema;
pub mod select;
pub mod service;
pub mod storage;
pub mod wire;

pub use builder::build_entity;
pub use context::RequestContext;
pub use expand::{ExpandItem, parse_expand};
pub use filter::{Clause, FilterError, Logical, Operator, Predicate, compare_values, evaluate};
pub use limits::QueryLimits;
pub use navigation::{ForeignKey, KeyList, NavigationResolver, Related};
pub use operation::{Binding, CustomOperation, OperationHandler, OperationKind};
pub use parser::{QueryParser, parse_query};
pub use query::{OrderBy, OrderKey, QueryParams, SortDir};
pub use router::{Operation, resolve};
pub use schema::{
    CollectionDescriptor, EntityDescriptor, FieldDescriptor, Multiplicity, NavigationEdge,
    SchemaBuilder, SchemaError, SchemaRegistry,
};
pub use service::{ODataRequest, ODataResponse, ODataService, Payload, ServiceConfig};
pub use storage::{InMemoryStore, Store, StoreError};
pub use wire::{CoercionError, WireType};

/// A stored entity as a JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Unified error type for query parsing, routing and response building.
///
/// ## HTTP Mapping
///
/// The HTTP layer maps these onto RFC 9457 Problem responses:
/// - parse and validation errors → 400
/// - `RouteNotFound`, `EntityNotFound` → 404
/// - `Storage` → the status of the underlying [`StoreError`]
/// - `OperationFailed` → 500
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // Filter model errors (unsupported operator keys, bad operands)
    #[error("malformed filter: {0}")]
    MalformedFilter(#[from] FilterError),

    #[error("invalid $filter '{text}': {reason}")]
    FilterParse { text: String, reason: String },

    #[error("invalid $orderby '{text}': {reason}")]
    InvalidOrderBy { text: String, reason: String },

    #[error("invalid $select '{text}': {reason}")]
    InvalidSelect { text: String, reason: String },

    #[error("invalid {option} '{text}': {reason}")]
    InvalidPaging {
        option: &'static str,
        text: String,
        reason: String,
    },

    #[error("invalid $expand '{text}': {reason}")]
    InvalidExpand { text: String, reason: String },

    #[error("invalid query string '{text}': {reason}")]
    InvalidQuery { text: String, reason: String },

    #[error("navigation property '{property}' not found on entity '{entity}'")]
    NavigationNotFound { entity: String, property: String },

    #[error("no entity with key {key} in '{collection}'")]
    EntityNotFound { collection: String, key: String },

    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("invalid key '{literal}' for '{collection}': {reason}")]
    InvalidKey {
        collection: String,
        literal: String,
        reason: String,
    },

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    // Upstream storage failure, wrapped with where it happened
    #[error("storage {operation} on '{collection}'{} failed: {source}", key_suffix(.key.as_deref()))]
    Storage {
        operation: &'static str,
        collection: String,
        key: Option<String>,
        #[source]
        source: StoreError,
    },

    #[error("operation '{name}' failed: {source:#}")]
    OperationFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

fn key_suffix(key: Option<&str>) -> String {
    key.map(|k| format!("({k})")).unwrap_or_default()
}

impl Error {
    /// Wrap a storage failure with its operation context, logging it once.
    #[must_use]
    pub fn storage(
        operation: &'static str,
        collection: &str,
        key: Option<&str>,
        source: StoreError,
    ) -> Self {
        tracing::warn!(
            operation,
            collection,
            key = key.unwrap_or_default(),
            error = %source,
            "storage call failed"
        );
        Error::Storage {
            operation,
            collection: collection.to_owned(),
            key: key.map(str::to_owned),
            source,
        }
    }

    /// Short machine-readable code, stable across releases.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::MalformedFilter(_) => "MalformedFilter",
            Error::FilterParse { .. } => "FilterParseError",
            Error::InvalidOrderBy { .. } => "InvalidOrderBy",
            Error::InvalidSelect { .. } => "InvalidSelect",
            Error::InvalidPaging { .. } => "InvalidPaging",
            Error::InvalidExpand { .. } => "InvalidExpand",
            Error::InvalidQuery { .. } => "InvalidQuery",
            Error::NavigationNotFound { .. } => "NavigationNotFound",
            Error::EntityNotFound { .. } => "EntityNotFound",
            Error::RouteNotFound { .. } => "RouteNotFound",
            Error::InvalidKey { .. } => "InvalidKey",
            Error::InvalidBody(_) => "InvalidBody",
            Error::Storage { .. } => "UpstreamStorageError",
            Error::OperationFailed { .. } => "OperationFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_names_collection_and_key() {
        let err = Error::storage(
            "get",
            "Users",
            Some("42"),
            StoreError::Backend(anyhow::anyhow!("disk on fire")),
        );
        assert_eq!(
            err.to_string(),
            "storage get on 'Users'(42) failed: backend error: disk on fire"
        );
        assert_eq!(err.code(), "UpstreamStorageError");

        let err = Error::storage("find", "Users", None, StoreError::Backend(anyhow::anyhow!("x")));
        assert_eq!(err.to_string(), "storage find on 'Users' failed: backend error: x");
    }

    #[test]
    fn filter_errors_convert_into_malformed_filter() {
        let err: Error = FilterError::MalformedFilter {
            key: "$near".to_owned(),
        }
        .into();
        assert_eq!(err.code(), "MalformedFilter");
        assert!(err.to_string().contains("$near"));
    }
}
