#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use odata_core::{
    Binding, CustomOperation, EntityDescriptor, ForeignKey, InMemoryStore, KeyList,
    NavigationEdge, ODataService, OperationHandler, Record, RequestContext, SchemaBuilder,
    ServiceConfig, WireType,
};
use serde_json::{Value, json};
use tower::ServiceExt;

fn rec(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

struct Explode;

#[async_trait]
impl OperationHandler for Explode {
    async fn invoke(&self, _ctx: &RequestContext, _body: Option<Value>) -> anyhow::Result<Value> {
        anyhow::bail!("db password leaked in this message")
    }
}

pub fn app() -> Router {
    let users = InMemoryStore::new("id", WireType::Int32).with_records([
        rec(json!({"id": 1, "name": "ann", "groupId": 1})),
        rec(json!({"id": 2, "name": "bob", "groupId": 1})),
    ]);
    let groups = InMemoryStore::new("id", WireType::Int32)
        .with_records([rec(json!({"id": 1, "name": "core", "memberIds": [1, 2]}))]);

    let registry = SchemaBuilder::new()
        .register_entity(
            EntityDescriptor::new("User", "id")
                .field("id", WireType::Int32)
                .field("name", WireType::String)
                .field("groupId", WireType::Int32),
        )
        .register_entity(
            EntityDescriptor::new("Group", "id")
                .field("id", WireType::Int32)
                .field("name", WireType::String)
                .list_field("memberIds", WireType::Int32),
        )
        .register_collection("Users", "User", Arc::new(users))
        .register_collection("Groups", "Group", Arc::new(groups))
        .register_navigation(
            "User",
            NavigationEdge::one("group", "Groups", ForeignKey::new("groupId", "id")),
        )
        .register_navigation(
            "Group",
            NavigationEdge::many("members", "Users", KeyList::new("memberIds", "id")),
        )
        .register_operation("Users", CustomOperation::action("explode", Binding::Collection, Explode))
        .build()
        .unwrap();

    let service = ODataService::new(
        Arc::new(registry),
        ServiceConfig {
            base_url: "http://test".to_owned(),
            ..ServiceConfig::default()
        },
    );
    odata_http::router(Arc::new(service), &[])
}

pub async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> Response<Body> {
    let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
