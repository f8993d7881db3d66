use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use taskfarm::coordinator::Coordinator;
use taskfarm::scheduler::JobStore;
use taskfarm::server::{router, ServerState};

fn test_app() -> (Router, Arc<Coordinator>) {
    let coordinator = Arc::new(Coordinator::new(JobStore::new()));
    let state = ServerState {
        coordinator: coordinator.clone(),
        client_timeout: Duration::from_secs(15),
    };
    let app = router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
    (app, coordinator)
}

fn post(body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn test_add_jobs_returns_acks() {
    let (app, coordinator) = test_app();
    let body = json!({
        "request": "add-jobs",
        "data": [
            {"name": "a", "tasks": [{"call": "true"}, {"call": "true"}]},
            {"name": "b", "tasks": []}
        ]
    });

    let response = app.oneshot(post(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["response"], "ok");
    let acks = json["data"].as_array().unwrap();
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0]["name"], "a");
    assert_eq!(acks[0]["task_count"], 2);
    assert_eq!(coordinator.jobs().await.len(), 2);
}

#[tokio::test]
async fn test_add_jobs_treats_null_fields_as_missing() {
    let (app, coordinator) = test_app();
    let body = json!({
        "request": "add-jobs",
        "data": {
            "name": "nulls",
            "tags": null,
            "dependencies": null,
            "threads_per_task": null,
            "tasks": [{"name": null, "call": "true", "args": null, "status": null}]
        }
    });

    let response = app.oneshot(post(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let job = &coordinator.jobs().await[0];
    assert!(job.tags.is_empty());
    assert!(job.dependencies.is_empty());
    assert_eq!(job.threads_per_task, 0);
    assert_eq!(job.tasks[0].name, "");
    assert!(job.tasks[0].args.is_empty());
}

#[tokio::test]
async fn test_client_update_registers_and_assigns() {
    let (app, coordinator) = test_app();
    coordinator
        .handle_submission(vec![serde_json::from_value(json!({
            "name": "a",
            "threads_per_task": 1,
            "tasks": [{"call": "echo", "args": ["hi"]}]
        }))
        .unwrap()])
        .await;

    let body = json!({
        "request": "client-update",
        "data": {"hostname": "box", "id": "", "max_threads": 2, "free_threads": 2, "tasks": []}
    });
    let response = app.oneshot(post(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["response"], "update");
    assert_eq!(json["data"]["client"]["id"], "box-127.0.0.1:5000");
    assert_eq!(json["data"]["client"]["ip_family"], "IPv4");
    let new_tasks = json["data"]["new_tasks"].as_array().unwrap();
    assert_eq!(new_tasks.len(), 1);
    assert_eq!(new_tasks[0]["task"]["index"], 0);
    assert_eq!(new_tasks[0]["task"]["status"], "assigned");
    assert_eq!(new_tasks[0]["task"]["call"], "echo");
    assert!(json["data"]["tasks_to_remove"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_request_is_rejected() {
    let (app, _) = test_app();

    let response = app.oneshot(post("{ not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let (app, _) = test_app();
    let body = json!({"request": "client-update", "data": {"max_threads": "many"}});

    let response = app.oneshot(post(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let (app, _) = test_app();
    let body = json!({"request": "reboot-farm", "data": {}});

    let response = app.oneshot(post(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_request_gets_empty_reply() {
    let (app, _) = test_app();
    let body = json!({"request": "", "data": null});

    let response = app.oneshot(post(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_status_endpoint() {
    let (app, coordinator) = test_app();
    coordinator
        .handle_submission(vec![serde_json::from_value(json!({
            "name": "a",
            "tasks": [{"call": "true"}, {"call": "false"}]
        }))
        .unwrap()])
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["job_count"], 1);
    assert_eq!(json["tasks"]["total"], 2);
    assert_eq!(json["jobs"][0]["name"], "a");
    assert_eq!(json["jobs"][0]["status"], "pending");
}

#[tokio::test]
async fn test_cors_headers_present() {
    let (app, _) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .header("origin", "http://example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
}
