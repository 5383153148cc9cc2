//! Declarative schema section: entity types, navigation edges and
//! collections seeded into in-memory stores.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use odata_core::{
    EntityDescriptor, ForeignKey, InMemoryStore, KeyList, NavigationEdge, NavigationResolver,
    Record, SchemaBuilder, SchemaRegistry, WireType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub entities: Vec<EntityConfig>,
    pub collections: Vec<CollectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    pub name: String,
    pub key: String,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub navigations: Vec<NavigationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    /// `Edm.Int32`, `String`, `Collection(Edm.Int32)`, ...
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationKind {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// Related `remote` field equals the base record's `local` field.
    ForeignKey,
    /// Base record's `local` array lists related `remote` values.
    KeyList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigationConfig {
    pub name: String,
    /// Target collection.
    pub collection: String,
    pub kind: NavigationKind,
    pub via: ResolverKind,
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionConfig {
    pub name: String,
    pub entity: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seed: Vec<Record>,
}

/// Parse `Collection(T)` or `T`, with or without the `Edm.` prefix.
fn parse_field_type(raw: &str) -> Result<(WireType, bool)> {
    let raw = raw.trim();
    let (inner, collection) = match raw
        .strip_prefix("Collection(")
        .and_then(|r| r.strip_suffix(')'))
    {
        Some(inner) => (inner.trim(), true),
        None => (raw, false),
    };
    let wire: WireType = serde_json::from_value(Value::String(inner.to_owned()))
        .with_context(|| format!("unknown field type '{raw}'"))?;
    Ok((wire, collection))
}

fn entity_descriptor(config: &EntityConfig) -> Result<EntityDescriptor> {
    let mut entity = EntityDescriptor::new(config.name.as_str(), config.key.as_str());
    for field in &config.fields {
        let (wire, collection) = parse_field_type(&field.ty)
            .with_context(|| format!("entity '{}', field '{}'", config.name, field.name))?;
        entity = if collection {
            entity.list_field(field.name.as_str(), wire)
        } else {
            entity.field(field.name.as_str(), wire)
        };
    }
    Ok(entity)
}

fn navigation_edge(config: &NavigationConfig) -> NavigationEdge {
    let resolver: Arc<dyn NavigationResolver> = match config.via {
        ResolverKind::ForeignKey => {
            Arc::new(ForeignKey::new(config.local.as_str(), config.remote.as_str()))
        }
        ResolverKind::KeyList => Arc::new(KeyList::new(config.local.as_str(), config.remote.as_str())),
    };
    let multiplicity = match config.kind {
        NavigationKind::One => odata_core::Multiplicity::One,
        NavigationKind::Many => odata_core::Multiplicity::Many,
    };
    NavigationEdge::new(config.name.as_str(), config.collection.as_str(), multiplicity, resolver)
}

/// Every seed record must only carry declared fields of matching type.
fn check_seed(entity: &EntityDescriptor, collection: &str, seed: &[Record]) -> Result<()> {
    for (i, record) in seed.iter().enumerate() {
        for (name, value) in record {
            let Some(field) = entity.find_field(name) else {
                bail!("collection '{collection}', seed #{i}: unknown field '{name}'");
            };
            if !field.accepts(value) {
                bail!(
                    "collection '{collection}', seed #{i}: field '{name}' does not accept {value}"
                );
            }
        }
    }
    Ok(())
}

impl SchemaConfig {
    /// Turn the declarations into a registry backed by seeded in-memory stores.
    ///
    /// # Errors
    /// Unknown field types, seed records that do not fit their entity, and
    /// every registry validation failure.
    pub fn build_registry(&self) -> Result<SchemaRegistry> {
        let mut builder = SchemaBuilder::new();
        if let Some(ns) = &self.namespace {
            builder = builder.namespace(ns.as_str());
        }

        let mut entities = Vec::with_capacity(self.entities.len());
        for config in &self.entities {
            let entity = entity_descriptor(config)?;
            builder = builder.register_entity(entity.clone());
            for nav in &config.navigations {
                builder = builder.register_navigation(config.name.as_str(), navigation_edge(nav));
            }
            entities.push(entity);
        }

        for config in &self.collections {
            let entity = entities
                .iter()
                .find(|e| e.name() == config.entity)
                .with_context(|| {
                    format!("collection '{}' names unknown entity '{}'", config.name, config.entity)
                })?;
            check_seed(entity, &config.name, &config.seed)?;
            let store = InMemoryStore::new(entity.key(), entity.key_type())
                .with_records(config.seed.iter().cloned());
            tracing::debug!(
                collection = %config.name,
                entity = %config.entity,
                records = store.len(),
                "seeded collection"
            );
            builder =
                builder.register_collection(config.name.as_str(), config.entity.as_str(), Arc::new(store));
        }

        builder.build().context("invalid schema")
    }
}
