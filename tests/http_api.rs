//! Request/response endpoints driven through the router without a socket.

mod common;

use axum::{
    Router,
    body::{self, Body},
    http::{Request, StatusCode, header},
};
use common::{memory_store, test_config};
use gigchat::{AppState, Config, app};
use serde_json::{Value, json};
use tower::ServiceExt;

type TestResult = anyhow::Result<()>;

async fn build_app(config: Config) -> anyhow::Result<(Router, AppState)> {
    let state = AppState::new(memory_store().await, config);
    Ok((app(state.clone())?, state))
}

async fn call(app: &Router, request: Request<Body>) -> anyhow::Result<(StatusCode, Option<String>, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_owned);
    let bytes = body::to_bytes(response.into_body(), 1024 * 64).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, cookie, json))
}

async fn login(app: &Router, identity: &str) -> anyhow::Result<String> {
    let (status, cookie, _) = call(
        app,
        Request::builder()
            .method("POST")
            .uri(format!("/api/dev/login/{identity}"))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    cookie.ok_or_else(|| anyhow::anyhow!("no session cookie"))
}

fn post_message(cookie: Option<&str>, body: Value) -> anyhow::Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/messages")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    Ok(builder.body(Body::from(body.to_string()))?)
}

fn get(uri: &str, cookie: &str) -> anyhow::Result<Request<Body>> {
    Ok(Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())?)
}

#[tokio::test]
async fn persist_requires_a_session() -> TestResult {
    let (app, _) = build_app(test_config()).await?;

    let (status, _, json) = call(&app, post_message(None, json!({"receiverId": "u2", "content": "hi"}))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Unauthorized");
    Ok(())
}

#[tokio::test]
async fn persist_rejects_blank_content() -> TestResult {
    let (app, state) = build_app(test_config()).await?;
    let cookie = login(&app, "u1").await?;

    let (status, _, json) = call(&app, post_message(Some(cookie.as_str()), json!({"receiverId": "u2", "content": "  "}))?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
    assert!(state.store.between(&"u1".into(), &"u2".into()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn persisted_message_shows_up_everywhere() -> TestResult {
    let (app, _) = build_app(test_config()).await?;
    let cookie_a = login(&app, "u1").await?;
    let cookie_b = login(&app, "u2").await?;

    let (status, _, created) =
        call(&app, post_message(Some(cookie_a.as_str()), json!({"receiverId": "u2", "content": "hello"}))?).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["senderId"], "u1");
    assert_eq!(created["receiverId"], "u2");
    assert_eq!(created["content"], "hello");
    assert!(created["id"].is_string());
    assert!(created["createdAt"].is_string());

    let (status, _, history) = call(&app, get("/api/messages?userId=u1", &cookie_b)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history, json!([created.clone()]));

    let (status, _, recent) = call(&app, get("/api/messages/recent", &cookie_a)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recent, json!([created.clone()]));

    let (status, _, conversations) = call(&app, get("/api/conversations", &cookie_b)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversations[0]["participantId"], "u1");
    assert_eq!(conversations[0]["lastMessage"], "hello");
    assert_eq!(conversations[0]["id"], created["id"]);
    Ok(())
}

#[tokio::test]
async fn history_requires_peer() -> TestResult {
    let (app, _) = build_app(test_config()).await?;
    let cookie = login(&app, "u1").await?;

    let (status, _, json) = call(&app, get("/api/messages", &cookie)?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing userId parameter");
    Ok(())
}

#[tokio::test]
async fn logout_drops_the_identity() -> TestResult {
    let (app, _) = build_app(test_config()).await?;
    let cookie = login(&app, "u1").await?;

    let (status, _, _) = call(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/logout")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = call(&app, get("/api/conversations", &cookie)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn dev_login_is_off_by_default() -> TestResult {
    let (app, _) = build_app(Config::default()).await?;

    let (status, _, _) = call(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/dev/login/u1")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
