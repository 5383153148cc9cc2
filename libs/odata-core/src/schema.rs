//! Schema registry: entities, collections, navigation edges and operations.
//!
//! Everything is declared up-front through [`SchemaBuilder`] and frozen by
//! [`SchemaBuilder::build`]; the resulting [`SchemaRegistry`] is read-only and
//! shared by all requests.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::Record;
use crate::navigation::{NavigationResolver, Related};
use crate::operation::{Binding, CustomOperation};
use crate::query::QueryParams;
use crate::storage::{Store, StoreError};
use crate::wire::WireType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("entity '{0}' is registered twice")]
    DuplicateEntity(String),

    #[error("collection '{0}' is registered twice")]
    DuplicateCollection(String),

    #[error("entity '{entity}' declares '{name}' more than once")]
    DuplicateMember { entity: String, name: String },

    #[error("key '{key}' of entity '{entity}' is not a declared field")]
    MissingKeyField { entity: String, key: String },

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("operation '{name}' is registered twice on '{collection}'")]
    DuplicateOperation { collection: String, name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub wire_type: WireType,
    /// `Collection(wire_type)`: the value is an array of that type.
    pub collection: bool,
}

impl FieldDescriptor {
    /// Whether `value` may be stored in this field.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Array(items) if self.collection => {
                items.iter().all(|v| !v.is_null() && self.wire_type.accepts(v))
            }
            _ if self.collection => false,
            other => self.wire_type.accepts(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Multiplicity {
    One,
    Many,
}

/// A navigation property: a named edge to the records of another collection.
#[derive(Clone)]
pub struct NavigationEdge {
    name: String,
    collection: String,
    target_entity: String,
    multiplicity: Multiplicity,
    resolver: Arc<dyn NavigationResolver>,
}

impl NavigationEdge {
    /// To-one edge into `collection`.
    #[must_use]
    pub fn one(
        name: impl Into<String>,
        collection: impl Into<String>,
        resolver: impl NavigationResolver + 'static,
    ) -> Self {
        Self::new(name, collection, Multiplicity::One, Arc::new(resolver))
    }

    /// To-many edge into `collection`.
    #[must_use]
    pub fn many(
        name: impl Into<String>,
        collection: impl Into<String>,
        resolver: impl NavigationResolver + 'static,
    ) -> Self {
        Self::new(name, collection, Multiplicity::Many, Arc::new(resolver))
    }

    #[must_use]
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        multiplicity: Multiplicity,
        resolver: Arc<dyn NavigationResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            target_entity: String::new(),
            multiplicity,
            resolver,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing collection of the related records.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Entity type of the related records (filled in at build time).
    #[must_use]
    pub fn target_entity(&self) -> &str {
        &self.target_entity
    }

    #[must_use]
    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.multiplicity == Multiplicity::Many
    }

    /// Resolve the related records of `base`.
    ///
    /// # Errors
    /// Propagates the resolver's storage error.
    pub async fn resolve(
        &self,
        base: &Record,
        store: &dyn Store,
        query: &QueryParams,
    ) -> Result<Related, StoreError> {
        let rows = self.resolver.resolve(base, store, query).await?;
        Ok(match self.multiplicity {
            Multiplicity::One => Related::One(rows.into_iter().next()),
            Multiplicity::Many => Related::Many(rows),
        })
    }
}

impl fmt::Debug for NavigationEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationEdge")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("target_entity", &self.target_entity)
            .field("multiplicity", &self.multiplicity)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    name: String,
    key: String,
    fields: Vec<FieldDescriptor>,
    navigations: Vec<NavigationEdge>,
}

impl EntityDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            fields: Vec::new(),
            navigations: Vec::new(),
        }
    }

    /// Append a field; order of declaration is the default `$select` order.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, wire_type: WireType) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            wire_type,
            collection: false,
        });
        self
    }

    /// Append a `Collection(wire_type)` field.
    #[must_use]
    pub fn list_field(mut self, name: impl Into<String>, wire_type: WireType) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            wire_type,
            collection: true,
        });
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Case-insensitive field lookup.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn wire_type(&self, name: &str) -> Option<WireType> {
        self.find_field(name).map(|f| f.wire_type)
    }

    #[must_use]
    pub fn key_type(&self) -> WireType {
        self.wire_type(&self.key).unwrap_or(WireType::String)
    }

    #[must_use]
    pub fn navigations(&self) -> &[NavigationEdge] {
        &self.navigations
    }

    pub fn to_one(&self) -> impl Iterator<Item = &NavigationEdge> {
        self.navigations
            .iter()
            .filter(|n| n.multiplicity == Multiplicity::One)
    }

    pub fn to_many(&self) -> impl Iterator<Item = &NavigationEdge> {
        self.navigations
            .iter()
            .filter(|n| n.multiplicity == Multiplicity::Many)
    }

    /// Case-insensitive navigation lookup.
    #[must_use]
    pub fn navigation(&self, name: &str) -> Option<&NavigationEdge> {
        self.navigations
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(name))
    }

    fn declares(&self, name: &str) -> bool {
        self.find_field(name).is_some() || self.navigation(name).is_some()
    }
}

pub struct CollectionDescriptor {
    name: String,
    entity: Arc<EntityDescriptor>,
    store: Arc<dyn Store>,
    operations: Vec<CustomOperation>,
}

impl CollectionDescriptor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn operations(&self) -> &[CustomOperation] {
        &self.operations
    }

    #[must_use]
    pub fn operation(&self, name: &str, binding: Binding) -> Option<&CustomOperation> {
        self.operations
            .iter()
            .find(|op| op.binding() == binding && op.name() == name)
    }
}

impl fmt::Debug for CollectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionDescriptor")
            .field("name", &self.name)
            .field("entity", &self.entity.name)
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct SchemaRegistry {
    namespace: String,
    entities: Vec<Arc<EntityDescriptor>>,
    collections: Vec<Arc<CollectionDescriptor>>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn entities(&self) -> &[Arc<EntityDescriptor>] {
        &self.entities
    }

    /// Collections in registration order.
    #[must_use]
    pub fn collections(&self) -> &[Arc<CollectionDescriptor>] {
        &self.collections
    }

    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&Arc<CollectionDescriptor>> {
        self.collections.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Backend handle of a collection.
    #[must_use]
    pub fn store(&self, collection: &str) -> Option<Arc<dyn Store>> {
        self.collection(collection).map(|c| c.store())
    }
}

/// Collects registrations; nothing is validated until [`SchemaBuilder::build`].
#[must_use]
pub struct SchemaBuilder {
    namespace: String,
    entities: Vec<EntityDescriptor>,
    collections: Vec<(String, String, Arc<dyn Store>)>,
    navigations: Vec<(String, NavigationEdge)>,
    operations: Vec<(String, CustomOperation)>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub const DEFAULT_NAMESPACE: &'static str = "Default";

    pub fn new() -> Self {
        Self {
            namespace: Self::DEFAULT_NAMESPACE.to_owned(),
            entities: Vec::new(),
            collections: Vec::new(),
            navigations: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn register_entity(mut self, entity: EntityDescriptor) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn register_collection(
        mut self,
        name: impl Into<String>,
        entity: impl Into<String>,
        store: Arc<dyn Store>,
    ) -> Self {
        self.collections.push((name.into(), entity.into(), store));
        self
    }

    pub fn register_navigation(mut self, entity: impl Into<String>, edge: NavigationEdge) -> Self {
        self.navigations.push((entity.into(), edge));
        self
    }

    pub fn register_operation(
        mut self,
        collection: impl Into<String>,
        operation: CustomOperation,
    ) -> Self {
        self.operations.push((collection.into(), operation));
        self
    }

    /// Validate all registrations and freeze them into a registry.
    ///
    /// # Errors
    /// Returns the first `SchemaError` found: duplicate names, keys that are
    /// not fields, or references to unknown entities and collections.
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let SchemaBuilder {
            namespace,
            mut entities,
            collections,
            navigations,
            operations,
        } = self;

        for (i, entity) in entities.iter().enumerate() {
            check_name(&entity.name)?;
            if entities[..i].iter().any(|e| e.name == entity.name) {
                return Err(SchemaError::DuplicateEntity(entity.name.clone()));
            }
            for (j, field) in entity.fields.iter().enumerate() {
                check_name(&field.name)?;
                if entity.fields[..j]
                    .iter()
                    .any(|f| f.name.eq_ignore_ascii_case(&field.name))
                {
                    return Err(SchemaError::DuplicateMember {
                        entity: entity.name.clone(),
                        name: field.name.clone(),
                    });
                }
            }
            if entity.find_field(&entity.key).is_none() {
                return Err(SchemaError::MissingKeyField {
                    entity: entity.name.clone(),
                    key: entity.key.clone(),
                });
            }
        }

        for (i, (name, entity, _)) in collections.iter().enumerate() {
            check_name(name)?;
            if collections[..i].iter().any(|(n, _, _)| n == name) {
                return Err(SchemaError::DuplicateCollection(name.clone()));
            }
            if !entities.iter().any(|e| e.name == *entity) {
                return Err(SchemaError::UnknownEntity(entity.clone()));
            }
        }

        for (owner, mut edge) in navigations {
            check_name(&edge.name)?;
            edge.target_entity = collections
                .iter()
                .find(|(n, _, _)| *n == edge.collection)
                .map(|(_, e, _)| e.clone())
                .ok_or_else(|| SchemaError::UnknownCollection(edge.collection.clone()))?;
            let entity = entities
                .iter_mut()
                .find(|e| e.name == owner)
                .ok_or_else(|| SchemaError::UnknownEntity(owner.clone()))?;
            if entity.declares(&edge.name) {
                return Err(SchemaError::DuplicateMember {
                    entity: owner,
                    name: edge.name,
                });
            }
            entity.navigations.push(edge);
        }

        let entities: Vec<Arc<EntityDescriptor>> = entities.into_iter().map(Arc::new).collect();

        let mut built: Vec<CollectionDescriptor> = collections
            .into_iter()
            .filter_map(|(name, entity, store)| {
                let entity = entities.iter().find(|e| e.name == entity)?;
                Some(CollectionDescriptor {
                    name,
                    entity: Arc::clone(entity),
                    store,
                    operations: Vec::new(),
                })
            })
            .collect();

        for (collection, op) in operations {
            check_name(op.name())?;
            let target = built
                .iter_mut()
                .find(|c| c.name == collection)
                .ok_or_else(|| SchemaError::UnknownCollection(collection.clone()))?;
            if target.operation(op.name(), op.binding()).is_some() {
                return Err(SchemaError::DuplicateOperation {
                    collection,
                    name: op.name().to_owned(),
                });
            }
            target.operations.push(op);
        }

        tracing::debug!(
            namespace = %namespace,
            entities = entities.len(),
            collections = built.len(),
            "schema registry built"
        );

        Ok(SchemaRegistry {
            namespace,
            entities,
            collections: built.into_iter().map(Arc::new).collect(),
        })
    }
}

fn check_name(name: &str) -> Result<(), SchemaError> {
    let valid = !name.is_empty()
        && !name.starts_with('$')
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '(' | ')' | ',' | ';' | '\'' | '='));
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_owned()))
    }
}
