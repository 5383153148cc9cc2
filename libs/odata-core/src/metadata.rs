//! `$metadata` (CSDL JSON) and service documents.

use serde_json::{Map, Value, json};

use crate::context::RequestContext;
use crate::operation::{Binding, OperationKind};
use crate::schema::{EntityDescriptor, SchemaRegistry};

pub const CSDL_VERSION: &str = "4.0";
const CONTAINER: &str = "Container";

/// CSDL JSON document describing every entity type, bound operation and
/// entity set of the registry.
#[must_use]
pub fn metadata_document(registry: &SchemaRegistry) -> Value {
    let ns = registry.namespace();
    let mut schema = Map::new();

    for entity in registry.entities() {
        schema.insert(entity.name().to_owned(), entity_type(ns, entity));
    }

    for collection in registry.collections() {
        let bound_type = format!("{ns}.{}", collection.entity().name());
        for op in collection.operations() {
            let kind = match op.kind() {
                OperationKind::Function => "Function",
                OperationKind::Action => "Action",
            };
            let mut overload = json!({
                "$Kind": kind,
                "$IsBound": true,
                "$Parameter": [{
                    "$Name": "bindingParameter",
                    "$Type": bound_type,
                }],
                "$ReturnType": {"$Type": "Edm.Untyped", "$Nullable": true},
            });
            if op.binding() == Binding::Collection {
                overload["$Parameter"][0]["$Collection"] = Value::Bool(true);
            }
            let entry = schema
                .entry(op.name().to_owned())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(overloads) = entry {
                overloads.push(overload);
            }
        }
    }

    let mut container = Map::new();
    container.insert("$Kind".to_owned(), json!("EntityContainer"));
    for collection in registry.collections() {
        let entity = collection.entity();
        let mut set = json!({
            "$Collection": true,
            "$Type": format!("{ns}.{}", entity.name()),
        });
        if !entity.navigations().is_empty() {
            let bindings: Map<String, Value> = entity
                .navigations()
                .iter()
                .map(|nav| (nav.name().to_owned(), json!(nav.collection())))
                .collect();
            set["$NavigationPropertyBinding"] = Value::Object(bindings);
        }
        container.insert(collection.name().to_owned(), set);
    }
    schema.insert(CONTAINER.to_owned(), Value::Object(container));

    json!({
        "$Version": CSDL_VERSION,
        "$EntityContainer": format!("{ns}.{CONTAINER}"),
        ns: schema,
    })
}

fn entity_type(ns: &str, entity: &EntityDescriptor) -> Value {
    let mut ty = Map::new();
    ty.insert("$Kind".to_owned(), json!("EntityType"));
    ty.insert("$Key".to_owned(), json!([entity.key()]));

    for field in entity.fields() {
        let mut prop = Map::new();
        if field.collection {
            prop.insert("$Collection".to_owned(), Value::Bool(true));
        }
        prop.insert("$Type".to_owned(), json!(field.wire_type.edm_name()));
        if field.name != entity.key() {
            prop.insert("$Nullable".to_owned(), Value::Bool(true));
        }
        ty.insert(field.name.clone(), Value::Object(prop));
    }

    for nav in entity.navigations() {
        let mut prop = Map::new();
        prop.insert("$Kind".to_owned(), json!("NavigationProperty"));
        if nav.is_collection() {
            prop.insert("$Collection".to_owned(), Value::Bool(true));
        } else {
            prop.insert("$Nullable".to_owned(), Value::Bool(true));
        }
        prop.insert(
            "$Type".to_owned(),
            json!(format!("{ns}.{}", nav.target_entity())),
        );
        ty.insert(nav.name().to_owned(), Value::Object(prop));
    }

    Value::Object(ty)
}

/// Service document: one entry per entity set.
#[must_use]
pub fn service_document(ctx: &RequestContext) -> Value {
    let sets: Vec<Value> = ctx
        .registry
        .collections()
        .iter()
        .map(|c| json!({"name": c.name(), "kind": "EntitySet", "url": c.name()}))
        .collect();
    json!({
        "@odata.context": ctx.metadata_url(),
        "value": sets,
    })
}
