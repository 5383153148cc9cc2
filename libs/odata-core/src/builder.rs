//! Entity response builder.
//!
//! Turns a stored record into its wire object: `@odata.id`, the selected
//! fields, then one property per expanded navigation edge, built by the same
//! function one level down with the item's own query options.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use serde_json::{Map, Value};

use crate::Error;
use crate::Record;
use crate::context::RequestContext;
use crate::expand::{ExpandItem, parse_expand};
use crate::navigation::Related;
use crate::parser::QueryParser;
use crate::query::QueryParams;
use crate::schema::{CollectionDescriptor, EntityDescriptor, NavigationEdge};
use crate::select::project_record;

/// Build the wire object for `record`, expanding navigation edges named in
/// `query.expand` recursively until the expression is exhausted.
///
/// Unknown navigation names are skipped unless `ctx.limits.strict_expand`
/// is set. Edges at one level resolve concurrently.
///
/// # Errors
/// - `Error::NavigationNotFound` for unknown names under strict expand
/// - parse errors from a nested item's query options
/// - `Error::Storage` when a resolver's store call fails
pub fn build_entity<'a>(
    record: &'a Record,
    entity: &'a EntityDescriptor,
    collection: &'a str,
    query: &'a QueryParams,
    ctx: &'a RequestContext,
) -> BoxFuture<'a, Result<Value, Error>> {
    async move {
        let mut out = Map::new();
        out.insert(
            "@odata.id".to_owned(),
            Value::String(ctx.entity_id(collection, entity, record)),
        );

        let data_fields: Vec<String> = query
            .select
            .iter()
            .filter(|name| entity.find_field(name).is_some())
            .cloned()
            .collect();
        // project_record treats an empty list as "everything"
        if !data_fields.is_empty() {
            out.extend(project_record(record, &data_fields));
        }

        let items = parse_expand(&query.expand)?;
        let mut pending = Vec::with_capacity(items.len());
        for item in &items {
            let Some(edge) = entity.navigation(&item.property) else {
                if ctx.limits.strict_expand {
                    return Err(Error::NavigationNotFound {
                        entity: entity.name().to_owned(),
                        property: item.property.clone(),
                    });
                }
                tracing::debug!(
                    entity = entity.name(),
                    navigation = %item.property,
                    "ignoring unknown navigation in $expand"
                );
                continue;
            };
            let selected = query.selects(edge.name());
            pending.push(expand_edge(record, entity, edge, item, selected, ctx));
        }

        for (name, value) in try_join_all(pending).await? {
            if let Some(value) = value {
                out.insert(name, value);
            }
        }
        Ok(Value::Object(out))
    }
    .boxed()
}

/// Target collection of a navigation edge.
pub(crate) fn target_collection<'c>(
    ctx: &'c RequestContext,
    entity: &EntityDescriptor,
    edge: &NavigationEdge,
) -> Result<&'c Arc<CollectionDescriptor>, Error> {
    ctx.registry
        .collection(edge.collection())
        .ok_or_else(|| Error::NavigationNotFound {
            entity: entity.name().to_owned(),
            property: edge.name().to_owned(),
        })
}

async fn expand_edge(
    record: &Record,
    entity: &EntityDescriptor,
    edge: &NavigationEdge,
    item: &ExpandItem,
    selected: bool,
    ctx: &RequestContext,
) -> Result<(String, Option<Value>), Error> {
    let target = target_collection(ctx, entity, edge)?;
    let target_entity = target.entity();
    let sub = QueryParser::new(target_entity)
        .with_limits(ctx.limits.clone())
        .parse_options(item.options.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;

    tracing::trace!(
        entity = entity.name(),
        navigation = edge.name(),
        collection = target.name(),
        expand = %sub.expand,
        "expanding navigation"
    );

    // stores hand back whole records; each level projects its own select
    let store_query = sub.clone().with_select(Vec::new());
    let store = target.store();
    let related = edge
        .resolve(record, store.as_ref(), &store_query)
        .await
        .map_err(|e| {
            let key = record.get(entity.key()).unwrap_or(&Value::Null);
            Error::storage(
                "expand",
                target.name(),
                Some(&entity.key_type().key_literal(key)),
                e,
            )
        })?;

    let value = match related {
        Related::One(Some(row)) => {
            Some(build_entity(&row, target_entity, target.name(), &sub, ctx).await?)
        }
        Related::One(None) => selected.then_some(Value::Null),
        Related::Many(rows) => {
            let built = try_join_all(
                rows.iter()
                    .map(|row| build_entity(row, target_entity, target.name(), &sub, ctx)),
            )
            .await?;
            Some(Value::Array(built))
        }
    };
    Ok((edge.name().to_owned(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::{ForeignKey, KeyList};
    use crate::parser::parse_query;
    use crate::schema::{SchemaBuilder, SchemaRegistry};
    use crate::storage::InMemoryStore;
    use crate::wire::WireType;
    use serde_json::json;
    use tracing_test::traced_test;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn registry() -> Arc<SchemaRegistry> {
        let users = InMemoryStore::new("id", WireType::Int32).with_records([
            rec(json!({"id": 1, "name": "ann", "managerId": null})),
            rec(json!({"id": 2, "name": "bob", "managerId": 1})),
            rec(json!({"id": 3, "name": "cid", "managerId": 1})),
        ]);
        let groups = InMemoryStore::new("id", WireType::Int32).with_records([
            rec(json!({"id": 1, "title": "core", "memberIds": [1, 2]})),
        ]);

        Arc::new(
            SchemaBuilder::new()
                .register_entity(
                    EntityDescriptor::new("User", "id")
                        .field("id", WireType::Int32)
                        .field("name", WireType::String)
                        .field("managerId", WireType::Int32),
                )
                .register_entity(
                    EntityDescriptor::new("Group", "id")
                        .field("id", WireType::Int32)
                        .field("title", WireType::String)
                        .list_field("memberIds", WireType::Int32),
                )
                .register_collection("Users", "User", Arc::new(users))
                .register_collection("Groups", "Group", Arc::new(groups))
                .register_navigation(
                    "User",
                    NavigationEdge::one("manager", "Users", ForeignKey::new("managerId", "id")),
                )
                .register_navigation(
                    "User",
                    NavigationEdge::many("reports", "Users", ForeignKey::new("id", "managerId")),
                )
                .register_navigation(
                    "Group",
                    NavigationEdge::many("members", "Users", KeyList::new("memberIds", "id")),
                )
                .build()
                .unwrap(),
        )
    }

    async fn build(collection: &str, key: i64, query: &str, ctx: &RequestContext) -> Result<Value, Error> {
        let coll = ctx.registry.collection(collection).unwrap();
        let record = coll.store().get(&json!(key), &[]).await.unwrap().unwrap();
        let params = QueryParser::new(coll.entity())
            .with_limits(ctx.limits.clone())
            .parse(query)
            .unwrap();
        build_entity(&record, coll.entity(), coll.name(), &params, ctx).await
    }

    fn ctx() -> RequestContext {
        RequestContext::new(registry(), "http://host", "/odata")
    }

    #[tokio::test]
    async fn no_expand_means_no_navigation_keys() {
        let ctx = ctx();
        let value = build("Users", 2, "", &ctx).await.unwrap();
        assert_eq!(
            value,
            json!({
                "@odata.id": "http://host/odata/Users(2)",
                "id": 2,
                "name": "bob",
                "managerId": 1
            })
        );
    }

    #[tokio::test]
    async fn full_projection_is_record_plus_id() {
        let ctx = ctx();
        let value = build("Groups", 1, "", &ctx).await.unwrap();
        let mut expected = rec(json!({"id": 1, "title": "core", "memberIds": [1, 2]}));
        expected.insert("@odata.id".to_owned(), json!("http://host/odata/Groups(1)"));
        assert_eq!(value, Value::Object(expected));
    }

    #[tokio::test]
    async fn expand_members_with_nested_select() {
        let ctx = ctx();
        let value = build("Groups", 1, "$expand=members($select=id)", &ctx).await.unwrap();
        assert_eq!(
            value["members"],
            json!([
                {"@odata.id": "http://host/odata/Users(1)", "id": 1},
                {"@odata.id": "http://host/odata/Users(2)", "id": 2}
            ])
        );
    }

    #[tokio::test]
    async fn to_one_and_to_many_each_use_their_own_sub_query() {
        let ctx = ctx();
        let value = build(
            "Users",
            2,
            "$select=id&$expand=manager($select=name),reports($filter=name eq 'nobody')",
            &ctx,
        )
        .await
        .unwrap();

        let obj = value.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["@odata.id", "id", "manager", "reports"]);
        assert_eq!(
            value["manager"],
            json!({"@odata.id": "http://host/odata/Users(1)", "name": "ann"})
        );
        assert_eq!(value["reports"], json!([]));
    }

    #[tokio::test]
    async fn nested_expansion_recurses() {
        let ctx = ctx();
        let value = build(
            "Groups",
            1,
            "$select=id&$expand=members($select=id;$expand=reports($select=name;$orderby=name desc))",
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(
            value["members"][0]["reports"],
            json!([
                {"@odata.id": "http://host/odata/Users(3)", "name": "cid"},
                {"@odata.id": "http://host/odata/Users(2)", "name": "bob"}
            ])
        );
        assert_eq!(value["members"][1]["reports"], json!([]));
    }

    #[tokio::test]
    async fn empty_to_one_is_null_only_when_selected() {
        let ctx = ctx();
        let implicit = build("Users", 1, "$expand=manager", &ctx).await.unwrap();
        assert!(implicit.get("manager").is_none());

        let explicit = build("Users", 1, "$select=id,manager&$expand=manager", &ctx)
            .await
            .unwrap();
        assert_eq!(explicit.get("manager"), Some(&Value::Null));
        assert_eq!(
            explicit,
            json!({"@odata.id": "http://host/odata/Users(1)", "id": 1, "manager": null})
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn unknown_navigation_is_ignored_by_default() {
        let ctx = ctx();
        let value = build("Users", 1, "$select=id&$expand=friends", &ctx).await.unwrap();
        assert_eq!(value, json!({"@odata.id": "http://host/odata/Users(1)", "id": 1}));
        assert!(logs_contain("ignoring unknown navigation"));
    }

    #[tokio::test]
    async fn unknown_navigation_fails_under_strict_expand() {
        let ctx = ctx().with_limits(crate::QueryLimits::new().with_strict_expand(true));
        let err = build("Users", 1, "$expand=friends", &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NavigationNotFound { property, .. } if property == "friends"
        ));
    }

    #[tokio::test]
    async fn bad_nested_options_surface_as_parse_errors() {
        let ctx = ctx();
        let coll = ctx.registry.collection("Groups").unwrap();
        let record = coll.store().get(&json!(1), &[]).await.unwrap().unwrap();
        let params = parse_query("$expand=members($filter=age eq 1)", coll.entity()).unwrap();

        let err = build_entity(&record, coll.entity(), coll.name(), &params, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FilterParse { text, .. } if text == "age eq 1"));
    }
}
