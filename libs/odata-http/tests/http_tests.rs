#![allow(clippy::unwrap_used, clippy::expect_used)]

//! The axum router driven with `oneshot`.

mod common;

use axum::http::{StatusCode, header};
use common::{app, body_json, body_text, call};
use odata_http::{APPLICATION_PROBLEM_JSON, ODATA_JSON};
use serde_json::json;

#[tokio::test]
async fn entity_with_expand_is_served_as_odata_json() {
    // Arrange
    let app = app();

    // Act
    let response = call(app, "GET", "/odata/Groups(1)?$expand=members($select=id)", None).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), ODATA_JSON);
    assert_eq!(response.headers().get("odata-version").unwrap(), "4.0");
    let body = body_json(response).await;
    assert_eq!(
        body["members"],
        json!([
            {"@odata.id": "http://test/odata/Users(1)", "id": 1},
            {"@odata.id": "http://test/odata/Users(2)", "id": 2}
        ])
    );
}

#[tokio::test]
async fn percent_encoded_query_is_decoded() {
    let response = call(app(), "GET", "/odata/Users?$filter=name%20eq%20%27bob%27", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["@odata.count"], 1);
    assert_eq!(body["value"][0]["name"], "bob");
}

#[tokio::test]
async fn count_is_plain_text() {
    let response = call(app(), "GET", "/odata/Users/$count", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(body_text(response).await, "2");
}

#[tokio::test]
async fn create_returns_created_with_location() {
    let response = call(app(), "POST", "/odata/Users", Some(json!({"name": "cid"}))).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "http://test/odata/Users(3)"
    );
    assert_eq!(body_json(response).await["name"], "cid");
}

#[tokio::test]
async fn delete_returns_no_content() {
    let response = call(app(), "DELETE", "/odata/Users(2)", None).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn filter_errors_are_bad_request_problems() {
    let response = call(app(), "GET", "/odata/Users?$filter=id%20eq%20abc", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        APPLICATION_PROBLEM_JSON
    );
    let problem = body_json(response).await;
    assert_eq!(problem["status"], 400);
    assert_eq!(problem["code"], "FilterParseError");
    assert_eq!(problem["instance"], "/odata/Users");
    assert!(problem["detail"].as_str().unwrap().contains("id eq abc"));
}

#[tokio::test]
async fn unknown_routes_and_entities_are_not_found() {
    let response = call(app(), "GET", "/odata/Nope", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "RouteNotFound");

    let response = call(app(), "GET", "/odata/Users(42)", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "EntityNotFound");
}

#[tokio::test]
async fn duplicate_key_is_a_conflict() {
    let response = call(app(), "POST", "/odata/Users", Some(json!({"id": 1, "name": "x"}))).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "UpstreamStorageError");
}

#[tokio::test]
async fn malformed_json_body_is_rejected() {
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/odata/Users")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = tower::ServiceExt::oneshot(app(), request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "InvalidBody");
}

#[tokio::test]
async fn operation_failures_hide_their_cause() {
    let response = call(app(), "POST", "/odata/Users/explode", None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let problem = body_json(response).await;
    assert_eq!(problem["code"], "OperationFailed");
    assert!(!problem["detail"].as_str().unwrap().contains("password"));
}
