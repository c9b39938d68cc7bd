mod common;

use std::time::Duration;

use edudesk_core::auth::{FileTokenStore, TokenStore};
use edudesk_core::{ApiClient, ApiError, AuthState, ClientConfig, Session, TokenPair};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::api_client;

fn old_tokens() -> TokenPair {
    TokenPair::new("old-access", "old-refresh")
}

async fn mount_refresh(server: &MockServer, response: ResponseTemplate, times: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "old-refresh"})))
        .respond_with(response)
        .expect(times)
        .mount(server)
        .await;
}

fn new_tokens_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "new-access",
        "refresh_token": "new-refresh",
    }))
}

#[tokio::test]
async fn test_bearer_token_attached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exams"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_client(&server, Some(old_tokens()));
    let exams: Vec<Value> = api.get("/exams", None).await.unwrap();
    assert!(exams.is_empty());
}

#[tokio::test]
async fn test_no_authorization_header_without_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public/holidays"))
        .and(|req: &Request| !req.headers.contains_key("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["2026-12-25"])))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_client(&server, None);
    let holidays: Vec<String> = api.get("/public/holidays", None).await.unwrap();
    assert_eq!(holidays, vec!["2026-12-25"]);
}

#[tokio::test]
async fn test_401_refreshes_and_replays_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/students"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/students"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens_response(), 1).await;

    let api = api_client(&server, Some(old_tokens()));
    let students: Value = api.get("/students", None).await.unwrap();

    assert_eq!(students, json!([{"id": 1}]));
    assert_eq!(api.session().tokens(), Some(TokenPair::new("new-access", "new-refresh")));
    assert_eq!(*api.auth_state().borrow(), AuthState::LoggedIn);
}

#[tokio::test]
async fn test_refresh_failure_logs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/students"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(500), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let store = FileTokenStore::new(dir.path().to_path_buf());
    store.save(&old_tokens()).unwrap();

    let session = Session::load(FileTokenStore::new(dir.path().to_path_buf())).unwrap();
    let api = ApiClient::new(&ClientConfig::new(server.uri()), session).unwrap();
    let mut state = api.auth_state();
    assert_eq!(*state.borrow_and_update(), AuthState::LoggedIn);

    let result = api.get::<Value>("/students", None).await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert!(!api.is_authenticated());
    assert!(store.load().unwrap().is_none());
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow(), AuthState::LoggedOut);
}

#[tokio::test]
async fn test_replayed_401_does_not_refresh_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/timetable"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens_response(), 1).await;

    let api = api_client(&server, Some(old_tokens()));
    let result = api.get::<Value>("/timetable", None).await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    // The refresh itself worked, so the session survives
    assert_eq!(api.session().access_token().as_deref(), Some("new-access"));
    assert_eq!(*api.auth_state().borrow(), AuthState::LoggedIn);
}

#[tokio::test]
async fn test_missing_refresh_token_logs_out_without_refresh_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/students"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(new_tokens_response())
        .expect(0)
        .mount(&server)
        .await;

    let tokens = TokenPair {
        access_token: "old-access".to_string(),
        refresh_token: None,
    };
    let api = api_client(&server, Some(tokens));
    let result = api.get::<Value>("/students", None).await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert!(!api.is_authenticated());
    assert_eq!(*api.auth_state().borrow(), AuthState::LoggedOut);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    for route in ["/leave/requests", "/library/loans"] {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("authorization", "Bearer old-access"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(50)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("authorization", "Bearer new-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"route": route})))
            .expect(1)
            .mount(&server)
            .await;
    }
    mount_refresh(
        &server,
        new_tokens_response().set_delay(Duration::from_millis(50)),
        1,
    )
    .await;

    let api = api_client(&server, Some(old_tokens()));
    let (leave, loans) = tokio::join!(
        api.get::<Value>("/leave/requests", None),
        api.get::<Value>("/library/loans", None),
    );

    assert_eq!(leave.unwrap(), json!({"route": "/leave/requests"}));
    assert_eq!(loans.unwrap(), json!({"route": "/library/loans"}));
}

#[tokio::test]
async fn test_other_errors_propagate_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such route"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/settings"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid term dates"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/files/9"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(new_tokens_response())
        .expect(0)
        .mount(&server)
        .await;

    let api = api_client(&server, Some(old_tokens()));

    let missing = api.get::<Value>("/missing", None).await;
    assert!(matches!(missing, Err(ApiError::NotFound(ref body)) if body == "no such route"));

    let invalid = api.put::<Value, _>("/settings", &json!({"term_start": "x"})).await;
    assert!(matches!(invalid, Err(ApiError::Validation(_))));

    let gateway = api.delete::<Value>("/files/9").await;
    assert!(matches!(gateway, Err(ApiError::ServerError(_))));

    assert!(api.is_authenticated());
}

#[tokio::test]
async fn test_login_stores_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"username": "admin", "password": "hunter2"})))
        .respond_with(new_tokens_response())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leave/requests"))
        .and(header("authorization", "Bearer new-access"))
        .and(body_json(json!({"days": 2})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 44})))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_client(&server, None);
    let mut state = api.auth_state();
    api.login("admin", "hunter2").await.unwrap();

    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), AuthState::LoggedIn);

    let created: Value = api.post("/leave/requests", &json!({"days": 2})).await.unwrap();
    assert_eq!(created, json!({"id": 44}));
}

#[tokio::test]
async fn test_login_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let api = api_client(&server, None);
    let result = api.login("admin", "wrong").await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert!(!api.is_authenticated());
}

#[tokio::test]
async fn test_refresh_without_rotated_refresh_token_keeps_old_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transport/buses"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transport/buses"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"access_token": "new-access"})),
        1,
    )
    .await;

    let api = api_client(&server, Some(old_tokens()));
    let _: Value = api.get("/transport/buses", None).await.unwrap();

    assert_eq!(api.session().tokens(), Some(TokenPair::new("new-access", "old-refresh")));
}

#[tokio::test]
async fn test_empty_success_body_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/library/books/3"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_client(&server, Some(old_tokens()));
    let body: Value = api.delete("/library/books/3").await.unwrap();
    assert_eq!(body, Value::Null);
}
