//! Navigation resolvers: how a base record reaches its related records.

use async_trait::async_trait;
use serde_json::Value;

use crate::Record;
use crate::filter::{Clause, Predicate};
use crate::query::QueryParams;
use crate::storage::{Store, StoreError};

/// Result of resolving one navigation edge for one base record.
#[derive(Clone, Debug, PartialEq)]
pub enum Related {
    One(Option<Record>),
    Many(Vec<Record>),
}

/// Looks up the records related to `base` in the target collection's store.
///
/// `query` carries the filter, order and paging derived for the related
/// entity; implementations narrow it further and hand it to `store.find`.
#[async_trait]
pub trait NavigationResolver: Send + Sync {
    async fn resolve(
        &self,
        base: &Record,
        store: &dyn Store,
        query: &QueryParams,
    ) -> Result<Vec<Record>, StoreError>;
}

/// Match `remote` on the related records against `local` on the base record.
///
/// Covers to-one edges (`Order.customerId → Customer.id`) and to-many edges
/// pointing back at the base (`Customer.id ← Order.customerId`).
#[derive(Clone, Debug)]
pub struct ForeignKey {
    pub local: String,
    pub remote: String,
}

impl ForeignKey {
    #[must_use]
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

#[async_trait]
impl NavigationResolver for ForeignKey {
    async fn resolve(
        &self,
        base: &Record,
        store: &dyn Store,
        query: &QueryParams,
    ) -> Result<Vec<Record>, StoreError> {
        let value = match base.get(&self.local) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(v) => v.clone(),
        };
        let narrowed = query
            .clone()
            .with_filter(Predicate::field(&self.remote, Clause::eq(value)).and(query.filter.clone()));
        store.find(&narrowed).await
    }
}

/// The base record holds an array of related keys (`Group.memberIds`).
#[derive(Clone, Debug)]
pub struct KeyList {
    pub local: String,
    pub remote: String,
}

impl KeyList {
    #[must_use]
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

#[async_trait]
impl NavigationResolver for KeyList {
    async fn resolve(
        &self,
        base: &Record,
        store: &dyn Store,
        query: &QueryParams,
    ) -> Result<Vec<Record>, StoreError> {
        let keys = match base.get(&self.local) {
            Some(Value::Array(keys)) if !keys.is_empty() => keys.clone(),
            _ => return Ok(Vec::new()),
        };
        let narrowed = query
            .clone()
            .with_filter(Predicate::field(&self.remote, Clause::one_of(keys)).and(query.filter.clone()));
        store.find(&narrowed).await
    }
}
