// Copyright 2025 KohakuHub Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests against the assembled router, backed by an
//! in-memory SQLite store. External stores (versioned store, S3) are
//! not contacted by any flow exercised here.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use kohakuhub_core::HubConfig;
use kohakuhub_db::Db;
use kohakuhub_server::state::AppState;
use kohakuhub_storage::{RosClient, VosClient};

async fn test_router() -> Router {
    let mut config = HubConfig::default();
    config.app.session_secret = "test-secret".into();
    config.app.database_key = "test-database-key".into();

    let db = Db::connect("sqlite::memory:").await.expect("test db");
    let vos = VosClient::new("http://127.0.0.1:1", "ak", "sk");
    let ros = RosClient::new("http://127.0.0.1:1", "us-east-1", "ak", "sk", None);
    let state = AppState::new(config, db, vos, ros).expect("state");
    kohakuhub_server::build_router(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn version_endpoint_identifies_the_hub() {
    let app = test_router().await;
    let response = app
        .oneshot(Request::get("/api/version").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["api"], "kohakuhub");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn health_endpoint() {
    let app = test_router().await;
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_repo_carries_hf_error_headers() {
    let app = test_router().await;
    let response = app
        .oneshot(
            Request::get("/api/models/nobody/nothing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get("X-Error-Code").unwrap(),
        "RepoNotFound"
    );
    // Error bodies are empty; clients parse headers.
    let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn invalid_repo_type_is_rejected() {
    let app = test_router().await;
    let response = app
        .oneshot(Request::get("/api/gadgets").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get("X-Error-Code").unwrap(),
        "InvalidRepoType"
    );
}

#[tokio::test]
async fn register_login_and_whoami_flow() {
    let app = test_router().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "correct-horse",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Wrong password is a 401.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": "alice", "password": "wrong" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": "alice", "password": "correct-horse" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/whoami-v2")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "alice");
    assert_eq!(body["site"]["api"], "kohakuhub");

    // Anonymous whoami is a 401.
    let response = app
        .oneshot(Request::get("/api/whoami-v2").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn api_token_authenticates_requests() {
    let app = test_router().await;

    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({
                "username": "bob",
                "email": "bob@example.com",
                "password": "hunter2hunter2",
            }),
        ))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": "bob", "password": "hunter2hunter2" }),
        ))
        .await
        .unwrap();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/auth/tokens")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, &cookie)
                .body(Body::from(
                    serde_json::json!({ "name": "laptop" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let token = body["token"].as_str().unwrap().to_string();
    assert!(token.starts_with("kh_"));

    let response = app
        .oneshot(
            Request::get("/api/whoami-v2")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "bob");
}

#[tokio::test]
async fn check_name_reports_reserved_and_conflicts() {
    let app = test_router().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/validate/check-name",
            serde_json::json!({ "name": "admin" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["available"], false);

    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({
                "username": "My-Name",
                "email": "m@example.com",
                "password": "longenoughpw",
            }),
        ))
        .await
        .unwrap();

    // Normalized conflict: my_name == My-Name.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/validate/check-name",
            serde_json::json!({ "name": "my_name" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["available"], false);
    assert_eq!(body["normalized_name"], "myname");

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/validate/check-name",
            serde_json::json!({ "name": "unclaimed" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["available"], true);
}

#[tokio::test]
async fn admin_api_disabled_answers_503() {
    let app = test_router().await;
    let response = app
        .oneshot(Request::get("/api/admin/users").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn commit_requires_authentication() {
    let app = test_router().await;
    let response = app
        .oneshot(
            Request::post("/api/models/alice/repo/commit/main")
                .header(header::CONTENT_TYPE, "application/x-ndjson")
                .body(Body::from(
                    r#"{"key":"header","value":{"summary":"init"}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    // Repo does not exist; anonymous callers see 404 before any engine
    // work happens.
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validate_yaml_endpoint() {
    let app = test_router().await;
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/validate-yaml",
            serde_json::json!({ "content": "a: 1\nb:\n  - x\n  - y" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["valid"], true);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/validate-yaml",
            serde_json::json!({ "content": "a: [unclosed" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn org_lifecycle_and_permissions() {
    let app = test_router().await;

    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({
                "username": "carol",
                "email": "c@example.com",
                "password": "longenoughpw",
            }),
        ))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": "carol", "password": "longenoughpw" }),
        ))
        .await
        .unwrap();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    // Anonymous creation is rejected.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/org/create",
            serde_json::json!({ "name": "acme" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/org/create")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, &cookie)
                .body(Body::from(
                    serde_json::json!({ "name": "acme", "description": "An org" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The creator is super-admin.
    let response = app
        .clone()
        .oneshot(
            Request::get("/api/org/acme/members")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["members"][0]["user"], "carol");
    assert_eq!(body["members"][0]["role"], "super-admin");

    // Org names share the namespace with usernames.
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/validate/check-name",
            serde_json::json!({ "name": "ACME" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["available"], false);
}
