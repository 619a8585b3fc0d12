//! Integration tests for the object API.
//!
//! Each test starts its own server on an ephemeral port.

mod common;

use common::{spawn_default, spawn_server, status_and_body};
use reqwest::StatusCode;
use serde_json::json;
use tether_server::config::Config;

#[tokio::test]
async fn health_reports_api_version() {
    let (base, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let (status, body) = status_and_body(client.get(format!("{base}/health"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["apiVersion"], "1.1");
    assert_eq!(body["objects"], 0);
}

#[tokio::test]
async fn object_lifecycle() {
    let (base, state) = spawn_default().await;
    let client = reqwest::Client::new();

    let (status, created) = status_and_body(
        client
            .post(format!("{base}/1.1/classes/Post"))
            .json(&json!({"title": "hello", "views": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["objectId"].as_str().unwrap().to_string();
    assert!(created["createdAt"].is_string());
    assert_eq!(state.store.len(), 1);

    let (status, updated) = status_and_body(
        client
            .put(format!("{base}/1.1/classes/Post/{id}"))
            .query(&[("fetchWhenSave", "true")])
            .json(&json!({"views": {"__op": "Increment", "amount": 4}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["views"], 5);
    assert_eq!(updated["title"], "hello");

    let (status, fetched) =
        status_and_body(client.get(format!("{base}/1.1/classes/Post/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["views"], 5);
    assert_eq!(fetched["objectId"], id.as_str());

    let (status, _) =
        status_and_body(client.delete(format!("{base}/1.1/classes/Post/{id}"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        status_and_body(client.get(format!("{base}/1.1/classes/Post/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 101);
}

#[tokio::test]
async fn where_condition_guards_updates() {
    let (base, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let (_, created) = status_and_body(
        client
            .post(format!("{base}/1.1/classes/Doc"))
            .json(&json!({"rev": 1})),
    )
    .await;
    let id = created["objectId"].as_str().unwrap();

    let (status, body) = status_and_body(
        client
            .put(format!("{base}/1.1/classes/Doc/{id}"))
            .query(&[("where", r#"{"rev":0}"#)])
            .json(&json!({"rev": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 305);

    let (status, _) = status_and_body(
        client
            .put(format!("{base}/1.1/classes/Doc/{id}"))
            .query(&[("where", r#"{"rev":1}"#)])
            .json(&json!({"rev": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_requests() {
    let (base, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let (status, body) = status_and_body(
        client
            .post(format!("{base}/1.1/classes/Post"))
            .header("content-type", "application/json")
            .body("{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 107);

    let (status, body) = status_and_body(
        client
            .post(format!("{base}/1.1/classes/Post"))
            .json(&json!({"owner": {"__type": "Pointer", "className": "User"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 106);

    let (status, body) = status_and_body(
        client
            .post(format!("{base}/9/classes/Post"))
            .json(&json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 101);
}

#[tokio::test]
async fn batch_reports_each_item() {
    let (base, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let (status, body) = status_and_body(
        client.post(format!("{base}/1.1/batch")).json(&json!({
            "requests": [
                {"method": "POST", "path": "/1.1/classes/Post", "body": {"title": "a"}},
                {"method": "PUT", "path": "/1.1/classes/Post/missing", "body": {"title": "b"}},
                {"method": "DELETE", "path": "/1.1/classes/Post/missing"},
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert!(items[0]["success"]["objectId"].is_string());
    assert_eq!(items[1]["error"]["code"], 101);
    assert_eq!(items[2]["error"]["code"], 101);
}

#[tokio::test]
async fn bearer_token_is_checked_when_configured() {
    let (base, _) = spawn_server(Config {
        auth_secret: Some("s3cret".into()),
        ..Config::default()
    })
    .await;
    let client = reqwest::Client::new();
    let url = format!("{base}/1.1/classes/Post");

    let (status, body) = status_and_body(client.post(&url).json(&json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);

    let (status, _) = status_and_body(
        client
            .post(&url)
            .bearer_auth("wrong")
            .json(&json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = status_and_body(
        client
            .post(&url)
            .bearer_auth("s3cret")
            .json(&json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Health stays open
    let (status, _) = status_and_body(client.get(format!("{base}/health"))).await;
    assert_eq!(status, StatusCode::OK);
}
