//! End-to-end requests through the axum router over a seeded in-memory store.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonapi_sdk::store::{RelationshipTargets, ResourceData};
use jsonapi_sdk::{
    jsonapi_routes, testing, AppState, InMemoryStore, JsonApiContext, JsonApiOptions, JsonApiService,
    ResourceDefinitionRegistry, ResourceKey, ResourceStore, ScalarValue,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Labels red (1) and green (2); posts A (no labels), B (both) and C (red), created as B, A, C.
async fn app() -> Router {
    testing::init_logging();
    let context = JsonApiContext::new(
        testing::blog_graph(),
        JsonApiOptions::default(),
        ResourceDefinitionRegistry::new(),
    )
    .unwrap();
    let store = InMemoryStore::new(context.graph.clone());
    let labels = context.graph.get_resource_type("labels").unwrap().clone();
    let posts = context.graph.get_resource_type("blogPosts").unwrap().clone();

    let mut tx = store.begin().await.unwrap();
    for name in ["red", "green"] {
        let mut data = ResourceData::default();
        data.attributes.insert("name".into(), ScalarValue::from(name));
        tx.create(&labels, &data).await.unwrap();
    }
    for (caption, label_ids) in [("B", vec![1, 2]), ("A", vec![]), ("C", vec![1])] {
        let mut data = ResourceData::default();
        data.attributes.insert("caption".into(), ScalarValue::from(caption));
        data.relationships.insert(
            "labels".into(),
            RelationshipTargets::ToMany(label_ids.into_iter().map(|id| ResourceKey::new("labels", id)).collect()),
        );
        tx.create(&posts, &data).await.unwrap();
    }
    tx.commit().await.unwrap();

    jsonapi_routes(AppState::new(JsonApiService::new(context, Arc::new(store))))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_operations(app: &Router, body: Value) -> (StatusCode, Value) {
    let request = Request::post("/operations")
        .header(header::CONTENT_TYPE, "application/vnd.api+json; ext=\"https://jsonapi.org/ext/atomic\"")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

fn captions(body: &Value) -> Vec<&str> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["attributes"]["caption"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn sort_by_attribute() {
    let app = app().await;
    let (status, body) = get(&app, "/blogPosts?sort=caption").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(captions(&body), vec!["A", "B", "C"]);
    assert_eq!(body["jsonapi"]["version"], json!("1.1"));
}

#[tokio::test]
async fn sort_by_descending_count() {
    let app = app().await;
    let (status, body) = get(&app, "/blogPosts?sort=-count(labels)").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(captions(&body), vec!["B", "C", "A"]);
}

#[tokio::test]
async fn filter_through_missing_to_one_does_not_fail() {
    let app = app().await;
    let (status, body) = get(&app, "/blogPosts?filter=equals(author.userName,'x')").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = get(&app, "/blogPosts?filter=equals(author,null)").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn circular_includes_emit_each_resource_once() {
    let app = app().await;
    let (status, body) = get(&app, "/blogPosts?sort=caption&include=labels.posts").await;
    assert_eq!(status, StatusCode::OK);
    let included = body["included"].as_array().unwrap();
    let keys: Vec<(String, String)> = included
        .iter()
        .map(|r| (r["type"].as_str().unwrap().to_string(), r["id"].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(keys, vec![("labels".to_string(), "1".to_string()), ("labels".to_string(), "2".to_string())]);
    assert_eq!(
        body["data"][1]["relationships"]["labels"]["data"],
        json!([{ "type": "labels", "id": "1" }, { "type": "labels", "id": "2" }])
    );
}

#[tokio::test]
async fn single_and_secondary_endpoints() {
    let app = app().await;
    let (status, body) = get(&app, "/blogPosts/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["attributes"]["caption"], json!("B"));
    assert_eq!(body["data"]["links"]["self"], json!("/blogPosts/1"));

    let (status, body) = get(&app, "/labels/1/posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _) = get(&app, "/blogPosts/404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&app, "/unknownThings").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn query_string_errors_name_the_parameter() {
    let app = app().await;
    let (status, body) = get(&app, "/blogPosts?sort=nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["source"]["parameter"], json!("sort"));
}

#[tokio::test]
async fn atomic_add_missing_required_attribute() {
    let app = app().await;
    let (status, body) = post_operations(
        &app,
        json!({ "atomic:operations": [
            { "op": "add", "data": { "type": "blogs", "attributes": { "platformName": "x" } } }
        ] }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["title"], json!("Input validation failed."));
    assert!(errors[0]["detail"].as_str().unwrap().contains("Title"));
    assert_eq!(errors[0]["source"]["pointer"], json!("/atomic:operations[0]/data/attributes/title"));
}

#[tokio::test]
async fn atomic_remove_with_id_and_lid() {
    let app = app().await;
    let (_, body) = post_operations(
        &app,
        json!({ "atomic:operations": [
            { "op": "remove", "ref": { "type": "blogPosts", "id": "1", "lid": "x" } }
        ] }),
    )
    .await;
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["source"]["pointer"], json!("/atomic:operations[0]/ref"));
}

#[tokio::test]
async fn atomic_batch_is_all_or_nothing() {
    let app = app().await;
    let (status, body) = post_operations(
        &app,
        json!({ "atomic:operations": [
            { "op": "add", "data": { "type": "blogs", "attributes": { "title": "kept?" } } },
            { "op": "add", "data": { "type": "blogs", "attributes": {} } }
        ] }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);

    let (_, body) = get(&app, "/blogs").await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn atomic_batch_returns_results() {
    let app = app().await;
    let (status, body) = post_operations(
        &app,
        json!({ "atomic:operations": [
            { "op": "add", "data": { "type": "blogs", "lid": "b", "attributes": { "title": "New" } } },
            { "op": "add", "data": {
                "type": "blogPosts",
                "attributes": { "caption": "D" },
                "relationships": { "parent": { "data": { "type": "blogs", "lid": "b" } } }
            } },
            { "op": "remove", "ref": { "type": "blogPosts", "id": "2" } }
        ] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["atomic:results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["data"]["attributes"]["title"], json!("New"));
    assert_eq!(results[2], json!({}));

    let (_, body) = get(&app, "/blogs/1/posts").await;
    assert_eq!(captions(&body), vec!["D"]);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let app = app().await;
    let request = Request::post("/operations").body(Body::from("{ nope")).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["title"], json!("Failed to deserialize request body."));
}
