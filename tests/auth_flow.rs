use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use backoffice::{
    api::{self, auth::AuthConfig, rate_limit::NoopRateLimiter, AppState},
    store::MemoryStore,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let state = AppState::with_limiter(
        AuthConfig::new(SecretString::from("integration-secret".to_string())),
        Arc::new(MemoryStore::new()),
        Arc::new(NoopRateLimiter),
    );
    api::router(Arc::new(state))
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&body)?)
        }
        None => Body::empty(),
    };
    Ok(builder.body(body)?)
}

async fn json_body(response: Response<Body>) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn token_of(body: &Value) -> String {
    body["data"]["accessToken"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn register_login_refresh_logout() -> Result<()> {
    let app = app();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "name": "alice",
                "email": "alice@example.com",
                "username": "alice",
                "password": "secret1"
            })),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["message"], "User created successfully!");
    assert_eq!(body["authorization"]["type"], "bearer");
    assert!(body["user"].get("password_hash").is_none());

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/login",
            None,
            Some(json!({"name": "alice", "password": "wrong-password"})),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await?;
    assert_eq!(body["code"], 1001);
    assert!(body.get("data").is_none());

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/login",
            None,
            Some(json!({"name": "alice", "password": "secret1"})),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["expires"], body["data"]["expires_in"]);
    assert!(body["data"]["expires"].as_i64().unwrap_or_default() > chrono::Utc::now().timestamp());
    let first = token_of(&body);

    let response = app
        .clone()
        .oneshot(request("GET", "/auth/me", Some(&first), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["name"], "alice");

    let response = app
        .clone()
        .oneshot(request("POST", "/auth/refresh", Some(&first), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let second = token_of(&json_body(response).await?);
    assert_ne!(first, second);

    // the refreshed token is dead
    let response = app
        .clone()
        .oneshot(request("GET", "/auth/me", Some(&first), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["code"], 401);

    let response = app
        .clone()
        .oneshot(request("POST", "/auth/logout", Some(&second), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["message"], "登出成功");

    let response = app
        .oneshot(request("GET", "/auth/me", Some(&second), None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn permissions_follow_role_grants() -> Result<()> {
    let app = app();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "name": "root",
                "email": "root@example.com",
                "username": "root",
                "password": "secret1"
            })),
        )?)
        .await?;
    let root = json_body(response).await?["authorization"]["token"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/admin/menu/create",
            Some(&root),
            Some(json!({"title": "Add user", "menuType": 3, "auths": "user:add"})),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let menu_id = json_body(response).await?["data"]["id"].clone();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/admin/role/create",
            Some(&root),
            Some(json!({"name": "Editor", "code": "editor", "menuIds": [menu_id]})),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let role_id = json_body(response).await?["data"]["id"].clone();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/admin/user/create",
            Some(&root),
            Some(json!({
                "name": "bob",
                "email": "bob@example.com",
                "username": "bob",
                "password": "secret1",
                "roleIds": [role_id]
            })),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/login",
            None,
            Some(json!({"name": "bob", "password": "secret1"})),
        )?)
        .await?;
    let body = json_body(response).await?;
    assert_eq!(body["data"]["roles"], json!(["editor"]));
    assert_eq!(body["data"]["permissions"], json!(["user:add"]));

    // admin routes need a token
    let response = app
        .oneshot(request("GET", "/admin/user/list", None, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
