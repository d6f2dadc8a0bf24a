//! Credential API integration tests

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{DateTime, Utc};
use common::{json_request, read_json, TestApp};
use serde_json::json;
use tower::ServiceExt;

fn timestamp(value: &serde_json::Value) -> DateTime<Utc> {
    value.as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_generate_clamps_ttl_to_one_hour() {
    let app = TestApp::new().await;
    let response = app
        .post_authed(
            "/api/tokens/generate",
            "10.0.0.1",
            json!({"channel": "lobby", "uid": "resident-1", "role": "subscriber", "ttlSeconds": 999999}),
        )
        .await;
    let (status, body) = read_json(response).await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["ttl_seconds"], 3600);
    assert_eq!(data["channel"], "lobby");
    assert_eq!(data["role"], "subscriber");
    assert!(!data["media_token"].as_str().unwrap().is_empty());
    assert!(!data["signaling_token"].as_str().unwrap().is_empty());
    let lifetime = timestamp(&data["expires_at"]) - timestamp(&data["issued_at"]);
    assert_eq!(lifetime.num_seconds(), 3600);
}

#[tokio::test]
async fn test_missing_or_invalid_bearer_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .router
        .clone()
        .oneshot(json_request("/api/tokens/standby", json!({"uid": "resident-1"})))
        .await
        .unwrap();
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    let mut request = json_request("/api/tokens/standby", json!({"uid": "resident-1"}));
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer forged".parse().unwrap());
    let (status, _) = read_json(app.router.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_for_call_requires_membership() {
    let app = TestApp::new().await;
    let call_id = app.start_call().await;

    let response = app
        .post_authed(
            "/api/tokens/for-call",
            "10.0.0.1",
            json!({"callId": call_id, "uid": "someone-else"}),
        )
        .await;
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let response = app
        .post_authed(
            "/api/tokens/for-call",
            "10.0.0.1",
            json!({"callId": call_id, "uid": app.residents[0].to_string()}),
        )
        .await;
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["channel"], format!("call-{}", call_id));
    assert_eq!(body["data"]["uid"], app.residents[0].to_string());
}

#[tokio::test]
async fn test_generate_multiple_skips_bad_entries() {
    let app = TestApp::new().await;
    let response = app
        .post_authed(
            "/api/tokens/generate-multiple",
            "10.0.0.1",
            json!({
                "channel": "lobby",
                "participants": [
                    {"uid": "doorman-1", "role": "publisher"},
                    {"role": "subscriber"},
                    {"uid": "resident-2", "ttlSeconds": 60},
                ],
            }),
        )
        .await;
    let (status, body) = read_json(response).await;

    assert_eq!(status, StatusCode::OK);
    let issued = body["data"]["issued"].as_array().unwrap();
    assert_eq!(issued.len(), 2);
    assert_eq!(issued[1]["ttl_seconds"], 60);
    assert_eq!(body["data"]["skipped"][0]["index"], 1);
}

#[tokio::test]
async fn test_generate_multiple_tolerates_non_string_uid() {
    let app = TestApp::new().await;
    let response = app
        .post_authed(
            "/api/tokens/generate-multiple",
            "10.0.0.1",
            json!({"channel": "lobby", "participants": [{"uid": "a"}, {"uid": 42}]}),
        )
        .await;
    let (status, body) = read_json(response).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let issued = body["data"]["issued"].as_array().unwrap();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0]["uid"], "a");
    let skipped = body["data"]["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["index"], 1);
}

#[tokio::test]
async fn test_malformed_token_request_gets_error_envelope() {
    let app = TestApp::new().await;
    let mut request = Request::post("/api/tokens/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"channel\": "))
        .unwrap();
    let headers = request.headers_mut();
    headers.insert(header::AUTHORIZATION, common::SESSION.parse().unwrap());
    headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_standby_and_validate() {
    let app = TestApp::new().await;

    let response = app
        .post_authed("/api/tokens/standby", "10.0.0.1", json!({"uid": "resident-1"}))
        .await;
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ttl_seconds"], 3600);
    assert!(body["data"].get("media_token").is_none());

    let response = app
        .post_authed(
            "/api/tokens/generate",
            "10.0.0.1",
            json!({"channel": "lobby", "uid": "resident-1"}),
        )
        .await;
    let (_, body) = read_json(response).await;
    let token = body["data"]["media_token"].as_str().unwrap().to_string();

    let response = app
        .post_authed(
            "/api/tokens/validate",
            "10.0.0.1",
            json!({"token": token, "channel": "lobby", "uid": "resident-1"}),
        )
        .await;
    let (_, body) = read_json(response).await;
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["uid"], "resident-1");

    let response = app
        .post_authed(
            "/api/tokens/validate",
            "10.0.0.1",
            json!({"token": token, "uid": "resident-2"}),
        )
        .await;
    let (_, body) = read_json(response).await;
    assert_eq!(body["data"]["valid"], false);
    assert_eq!(body["data"]["reason"], "uid mismatch");
}

#[tokio::test]
async fn test_rate_limit_is_per_client_address() {
    let app = TestApp::new().await;
    let body = json!({"uid": "resident-1"});

    for _ in 0..60 {
        let response = app
            .post_authed("/api/tokens/standby", "203.0.113.7", body.clone())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .post_authed("/api/tokens/standby", "203.0.113.7", body.clone())
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let (_, limited) = read_json(response).await;
    assert_eq!(limited["code"], "RATE_LIMIT_EXCEEDED");
    assert!(limited["retryAfter"].as_u64().unwrap() <= 60);

    let response = app
        .post_authed("/api/tokens/standby", "198.51.100.20", body)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_call_routes_do_not_require_bearer() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");

    let (status, body) = app.get("/api/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}
