//! Storage contract consumed by the service and the navigation resolvers.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::Record;
use crate::filter::Predicate;
use crate::query::QueryParams;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no record with key {key}")]
    NotFound { key: String },

    #[error("a record with key {key} already exists")]
    Conflict { key: String },

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    #[must_use]
    pub fn not_found(key: &Value) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    #[must_use]
    pub fn conflict(key: &Value) -> Self {
        Self::Conflict {
            key: key.to_string(),
        }
    }
}

/// Query contract of a collection's backing store.
///
/// `find` applies filter, order, paging and projection from [`QueryParams`];
/// `$expand` is never interpreted by a store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find(&self, query: &QueryParams) -> Result<Vec<Record>, StoreError>;

    async fn count(&self, filter: &Predicate) -> Result<u64, StoreError>;

    /// Fetch one record by primary key; `Ok(None)` when absent.
    async fn get(&self, key: &Value, select: &[String]) -> Result<Option<Record>, StoreError>;

    /// Insert a record, returning it as stored (with a generated key if it had none).
    async fn add(&self, record: Record) -> Result<Record, StoreError>;

    /// Merge `patch` into the stored record, returning the result.
    async fn update(&self, key: &Value, patch: Record) -> Result<Record, StoreError>;

    async fn remove(&self, key: &Value) -> Result<(), StoreError>;
}
