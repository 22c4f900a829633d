//! HTTP API integration tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use analyzer::retry::RetryPolicy;
use analyzer::state::Wiring;
use analyzer::worker::WorkerSettings;
use analyzer::{api, db, AppState};

fn quick_settings() -> WorkerSettings {
    let quick = RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_fraction: 0.3,
    };
    WorkerSettings {
        resolve_policy: quick,
        write_policy: quick,
        step_delay_min: Duration::ZERO,
        step_delay_max: Duration::ZERO,
    }
}

async fn setup_test_app() -> (axum::Router, Arc<AppState>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = temp_dir.path().join("analyzer.db");
    let pool = db::connect(db_path.to_str().expect("invalid path"))
        .await
        .expect("failed to open database");

    let state = Arc::new(
        AppState::new(
            pool,
            Wiring {
                worker: quick_settings(),
                ..Wiring::default()
            },
        )
        .expect("failed to build state"),
    );
    let app = api::router().with_state(state.clone());
    (app, state, temp_dir)
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("invalid json");
    (status, value)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn seed_catalog(app: &axum::Router, url: &str) {
    let (status, _) = json_response(
        app,
        json_request(
            "PUT",
            "/admin/analysis",
            json!({
                "url": url,
                "problems": [{
                    "problemDescription": "The page has a slow load time.",
                    "solutionText": "Optimize images and leverage caching.",
                    "impactText": "Improving load time can increase conversions by up to 15%.",
                    "experiments": []
                }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn wait_for_status(app: &axum::Router, task_id: &str, expected: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = json_response(app, get(&format!("/tasks/{task_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == expected {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {expected}");
}

#[tokio::test]
async fn test_health_check() {
    let (app, _state, _dir) = setup_test_app().await;
    let (status, body) = json_response(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "analyzer");
}

#[tokio::test]
async fn test_analyze_requires_url() {
    let (app, state, _dir) = setup_test_app().await;

    for body in [json!({}), json!({ "url": "" }), json!({ "url": "   " })] {
        let (status, response) =
            json_response(&app, json_request("POST", "/analyze", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["message"], "URL is required");
    }

    let malformed = Request::builder()
        .method("POST")
        .uri("/analyze")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = json_response(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.tasks.list_completed().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_analyze_without_subscriber_completes_and_is_listed() {
    let (app, _state, _dir) = setup_test_app().await;
    seed_catalog(&app, "example.com").await;

    let (status, body) = json_response(
        &app,
        json_request("POST", "/analyze", json!({ "url": "example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let task_id = body["taskId"].as_str().expect("taskId missing").to_string();

    let record = wait_for_status(&app, &task_id, "completed").await;
    assert_eq!(record["progress"], 100);
    assert_eq!(record["problems"].as_array().unwrap().len(), 1);

    let (status, body) = json_response(&app, get("/fetchRecords")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["url"], "example.com");
    assert_eq!(data[0]["status"], "completed");
}

#[tokio::test]
async fn test_analyze_unknown_domain_ends_in_error() {
    let (app, _state, _dir) = setup_test_app().await;

    let (_, body) = json_response(
        &app,
        json_request("POST", "/analyze", json!({ "url": "unknown-domain.test" })),
    )
    .await;
    let task_id = body["taskId"].as_str().unwrap().to_string();

    let record = wait_for_status(&app, &task_id, "error").await;
    assert_eq!(record["error"], "Client doesn't exist");
    assert!(record.get("problems").is_none());

    let (_, listed) = json_response(&app, get("/fetchRecords")).await;
    assert!(listed["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_unknown_task_is_404() {
    let (app, _state, _dir) = setup_test_app().await;
    let (status, body) = json_response(&app, get("/tasks/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["taskId"], "does-not-exist");
}

#[tokio::test]
async fn test_worker_endpoint_sync_reports() {
    let (app, state, _dir) = setup_test_app().await;
    seed_catalog(&app, "example.com").await;

    let (status, report) = json_response(
        &app,
        json_request(
            "POST",
            "/internal/worker",
            json!({ "url": "unknown-domain.test", "taskId": "t-unknown" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(report["message"], "Client doesn't exist");

    let (status, report) = json_response(
        &app,
        json_request("POST", "/internal/worker", json!({ "url": "example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(report.get("taskId").is_none());

    state.tasks.create("t-1", "example.com").await.unwrap();
    let payload = json!({ "url": "example.com", "taskId": "t-1" });
    let (status, report) =
        json_response(&app, json_request("POST", "/internal/worker", payload.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["skipped"], false);

    let (status, again) =
        json_response(&app, json_request("POST", "/internal/worker", payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["skipped"], true);
}

#[tokio::test]
async fn test_worker_endpoint_event_invocation_is_accepted() {
    let (app, state, _dir) = setup_test_app().await;
    seed_catalog(&app, "example.com").await;
    state.tasks.create("t-async", "example.com").await.unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/internal/worker")
        .header("content-type", "application/json")
        .header("x-invocation-type", "Event")
        .body(Body::from(
            json!({ "url": "example.com", "taskId": "t-async" }).to_string(),
        ))
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["taskId"], "t-async");

    wait_for_status(&app, "t-async", "completed").await;
}

#[tokio::test]
async fn test_admin_catalog_roundtrip() {
    let (app, state, _dir) = setup_test_app().await;

    let (status, body) = json_response(
        &app,
        json_request("PUT", "/admin/analysis", json!({ "problems": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "URL is required");

    seed_catalog(&app, "https://www.shop.example.com/").await;
    assert_eq!(
        state.catalog.recognize("example.com").await.unwrap().as_deref(),
        Some("example.com")
    );

    let (status, _) = json_response(
        &app,
        json_request("DELETE", "/admin/analysis", json!({ "url": "example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = json_response(
        &app,
        json_request("DELETE", "/admin/analysis", json!({ "url": "example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
