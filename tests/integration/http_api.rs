//! End-to-end flow through the HTTP router.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use trybook::server::router;

use crate::fixtures::{sh_agent, sh_build, TestEnv, WAIT_LIMIT};

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn poll_until_done(app: &Router, uri: &str) -> Value {
    let wait = async {
        loop {
            let (status, body) = call(app, get(uri)).await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            if body["done"] == true {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, wait).await.unwrap()
}

/// Test: Browser flow
/// Given an upstream repository
/// When a client syncs, opens a notebook and posts "test widget" over HTTP
/// Then every step succeeds and the execution view carries all three
/// sub-operations with summaries
#[tokio::test]
async fn test_sync_notebook_prompt_flow() {
    let env = TestEnv::new(
        vec![sh_agent("agent", "echo \"on it: $1\"")],
        sh_build("true", "touch test-ran"),
    );
    env.remotes.create("octo", "hello");
    let app = router(env.trybook.clone());

    let (status, started) = call(&app, post("/api/repos/sync", json!({ "repo": "octo/hello" }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let sync_id = started["operation_id"].as_str().unwrap().to_string();

    let sync = poll_until_done(&app, &format!("/api/repos/sync/{}", sync_id)).await;
    assert_eq!(sync["status"], "success", "{}", sync);
    assert_eq!(sync["revision"], env.remotes.head("octo", "hello"));
    assert_eq!(sync["repo"], "octo/hello");

    let (status, notebook) = call(&app, post("/api/notebooks/octo/hello", json!({}))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", notebook);
    assert_eq!(notebook["exists"], true);
    let name = notebook["name"].as_str().unwrap().to_string();
    assert_eq!(notebook["branch"], name);

    let (status, found) = call(&app, get(&format!("/api/notebooks/octo/hello/{}", name))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found, notebook);

    let (status, started) = call(
        &app,
        post(
            &format!("/api/notebooks/octo/hello/{}/prompts", name),
            json!({ "prompt": "test widget" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let execution_id = started["execution_id"].as_str().unwrap().to_string();

    let view = poll_until_done(&app, &format!("/api/executions/{}", execution_id)).await;
    assert_eq!(view["status"], "success", "{}", view);
    let ops = view["operations"].as_array().unwrap();
    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0]["label"], "agent");
    assert_eq!(ops[0]["output"], "on it: test widget\n");
    assert!(ops.iter().all(|op| op["summary"].as_str().is_some_and(|s| !s.is_empty())));
    assert_eq!(ops[2]["label"], "test");
    assert_eq!(ops[2]["status"], "success");
}

#[tokio::test]
async fn test_missing_resources_are_404() {
    let env = TestEnv::echo();
    let app = router(env.trybook.clone());

    let (status, body) = call(&app, get("/api/notebooks/octo/hello/nb")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, get(&format!("/api/repos/sync/{}", trybook::Id::new()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, get("/api/executions/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_prompt_is_rejected_before_lookup() {
    let env = TestEnv::echo();
    let notebook = env.notebook("octo", "hello").await;
    let app = router(env.trybook.clone());

    let (status, body) = call(
        &app,
        post(
            &format!("/api/notebooks/octo/hello/{}/prompts", notebook.name),
            json!({ "prompt": "" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("prompt"));

    let (status, _) = call(
        &app,
        post(&format!("/api/notebooks/octo/hello/{}/prompts", notebook.name), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
