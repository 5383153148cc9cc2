#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Shared fixture: `Users` and `Groups` with a to-one `group` edge, a
//! to-many `members` edge and a few bound operations.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use odata_core::{
    Binding, CustomOperation, EntityDescriptor, ForeignKey, InMemoryStore, KeyList,
    NavigationEdge, ODataRequest, ODataResponse, ODataService, OperationHandler, OrderBy,
    OrderKey, QueryParams, Record, RequestContext, SchemaBuilder, SchemaRegistry, ServiceConfig,
    WireType,
};
use serde_json::{Value, json};

pub const BASE: &str = "http://test";

pub fn rec(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

/// Collection-bound function: the name of the oldest user.
struct Oldest;

#[async_trait]
impl OperationHandler for Oldest {
    async fn invoke(&self, ctx: &RequestContext, _body: Option<Value>) -> anyhow::Result<Value> {
        let query = QueryParams::new()
            .with_order(OrderBy::empty().then(OrderKey::desc("age")))
            .with_top(1);
        let rows = ctx.store()?.find(&query).await?;
        let name = rows
            .first()
            .and_then(|r| r.get("name"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(json!({ "name": name }))
    }
}

/// Entity-bound action: sets `name` from the body and returns the record.
struct Rename;

#[async_trait]
impl OperationHandler for Rename {
    async fn invoke(&self, ctx: &RequestContext, body: Option<Value>) -> anyhow::Result<Value> {
        let name = body
            .as_ref()
            .and_then(|b| b.get("name"))
            .cloned()
            .context("body must carry a name")?;
        let updated = ctx
            .store()?
            .update(ctx.key()?, rec(json!({ "name": name })))
            .await?;
        Ok(Value::Object(updated))
    }
}

/// Entity-bound action with no result.
struct Touch;

#[async_trait]
impl OperationHandler for Touch {
    async fn invoke(&self, _ctx: &RequestContext, _body: Option<Value>) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

struct Explode;

#[async_trait]
impl OperationHandler for Explode {
    async fn invoke(&self, _ctx: &RequestContext, _body: Option<Value>) -> anyhow::Result<Value> {
        anyhow::bail!("boom")
    }
}

pub fn users() -> InMemoryStore {
    InMemoryStore::new("id", WireType::Int32).with_records([
        rec(json!({"id": 1, "name": "ann", "age": 30, "groupId": 1})),
        rec(json!({"id": 2, "name": "bob", "age": 25, "groupId": 1})),
        rec(json!({"id": 3, "name": "cid", "age": 41, "groupId": 2})),
        rec(json!({"id": 4, "name": "dee", "age": 25, "groupId": null})),
    ])
}

pub fn groups() -> InMemoryStore {
    InMemoryStore::new("id", WireType::Int32).with_records([
        rec(json!({"id": 1, "name": "core", "memberIds": [1, 2]})),
        rec(json!({"id": 2, "name": "ops", "memberIds": [3]})),
    ])
}

pub fn registry() -> Arc<SchemaRegistry> {
    let registry = SchemaBuilder::new()
        .register_entity(
            EntityDescriptor::new("User", "id")
                .field("id", WireType::Int32)
                .field("name", WireType::String)
                .field("age", WireType::Int32)
                .field("groupId", WireType::Int32),
        )
        .register_entity(
            EntityDescriptor::new("Group", "id")
                .field("id", WireType::Int32)
                .field("name", WireType::String)
                .list_field("memberIds", WireType::Int32),
        )
        .register_collection("Users", "User", Arc::new(users()))
        .register_collection("Groups", "Group", Arc::new(groups()))
        .register_navigation(
            "User",
            NavigationEdge::one("group", "Groups", ForeignKey::new("groupId", "id")),
        )
        .register_navigation(
            "Group",
            NavigationEdge::many("members", "Users", KeyList::new("memberIds", "id")),
        )
        .register_operation("Users", CustomOperation::function("oldest", Binding::Collection, Oldest))
        .register_operation("Users", CustomOperation::action("rename", Binding::Entity, Rename))
        .register_operation("Users", CustomOperation::action("touch", Binding::Entity, Touch))
        .register_operation("Users", CustomOperation::action("explode", Binding::Collection, Explode))
        .build()
        .expect("fixture schema is valid");
    Arc::new(registry)
}

pub fn service() -> ODataService {
    ODataService::new(
        registry(),
        ServiceConfig {
            base_url: BASE.to_owned(),
            ..ServiceConfig::default()
        },
    )
}

/// `GET {path}?{query}`, unwrapping the JSON body.
pub async fn get_json(service: &ODataService, path: &str, query: &str) -> Value {
    let response = service
        .handle(ODataRequest::new(http::Method::GET, path).with_query(query))
        .await
        .unwrap();
    assert_eq!(response.status, http::StatusCode::OK);
    response.json().cloned().expect("JSON payload")
}

pub async fn send(
    service: &ODataService,
    method: http::Method,
    path: &str,
    body: Value,
) -> Result<ODataResponse, odata_core::Error> {
    service
        .handle(ODataRequest::new(method, path).with_body(body))
        .await
}

pub fn ids(list: &Value) -> Vec<i64> {
    list["value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_i64().unwrap())
        .collect()
}
