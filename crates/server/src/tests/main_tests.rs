use super::*;
use axum::{body, body::Body, http::Request};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{mailer::Outbox, session::SessionSettings};

const RPC_PATH: &str = "/spa-api";

async fn test_app(cookie: CookieSettings) -> (Router, Arc<Outbox>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let outbox = Arc::new(Outbox::default());
    let settings = SessionSettings {
        otp_rounds: 10,
        admin_user: Some("root@example.com".into()),
        ..SessionSettings::default()
    };
    let sessions = Arc::new(EmailSessionManager::new(
        storage.clone(),
        outbox.clone(),
        &settings,
    ));
    sessions
        .bootstrap_admin(settings.admin_user.as_deref())
        .await
        .expect("admin");
    let mut rpc = RpcService::new(sessions.clone(), None);
    sessions.register(&mut rpc);

    let app = build_router(
        RPC_PATH,
        Arc::new(AppState {
            rpc: Arc::new(rpc),
            storage,
            cookie,
        }),
    );
    (app, outbox)
}

fn call(body: Value, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(RPC_PATH).header("content-type", "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

async fn json_body(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn set_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `name=value` from a Set-Cookie header, ready to send back.
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .expect("pair")
        .to_string()
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _outbox) = test_app(CookieSettings::default()).await;
    let request = Request::get("/healthz").body(Body::empty()).expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn get_returns_method_list() {
    let (app, _outbox) = test_app(CookieSettings::default()).await;
    let request = Request::get(RPC_PATH).body(Body::empty()).expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let names: Vec<String> = serde_json::from_value(json_body(response).await).expect("names");
    for expected in ["getMethods", "send_otp", "login", "check_user", "get_all_users"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }
}

#[tokio::test]
async fn non_json_post_returns_method_list() {
    let (app, _outbox) = test_app(CookieSettings::default()).await;
    let request = Request::post(RPC_PATH)
        .header("content-type", "text/plain")
        .body(Body::from("hello"))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert!(json_body(response).await.is_array());
}

#[tokio::test]
async fn malformed_envelope_is_bad_request() {
    let (app, _outbox) = test_app(CookieSettings::default()).await;
    let request = Request::post(RPC_PATH)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn anonymous_account_call_is_not_authorized() {
    let (app, _outbox) = test_app(CookieSettings::default()).await;
    let response = app
        .oneshot(call(
            json!({"method": "get_all_users", "args": [], "version": 2}),
            None,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response).is_none());
    assert_eq!(
        json_body(response).await,
        json!({
            "SimpleWebAPIError": "NotAuthorized",
            "Message": "The current user cannot call method 'get_all_users'."
        })
    );
}

#[tokio::test]
async fn legacy_request_gets_envelope() {
    let (app, _outbox) = test_app(CookieSettings::default()).await;
    let response = app
        .oneshot(call(json!({"method": "check_user"}), None))
        .await
        .expect("response");
    let body = json_body(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["result"]["authenticated"], json!(false));
}

#[tokio::test]
async fn email_login_flow_sets_and_clears_cookie() {
    let (app, outbox) = test_app(CookieSettings::default()).await;

    let response = app
        .clone()
        .oneshot(call(
            json!({"method": "send_otp", "args": ["Root@Example.com"], "version": 2}),
            None,
        ))
        .await
        .expect("send_otp");
    let challenge_cookie = set_cookie(&response).expect("challenge cookie");
    assert!(challenge_cookie.starts_with("token="));
    assert!(challenge_cookie.contains("HttpOnly"));
    assert!(challenge_cookie.contains("Path=/"));
    assert!(!challenge_cookie.contains("Secure"));
    let challenge = json_body(response).await;
    assert_eq!(cookie_pair(&challenge_cookie), format!("token={}", challenge.as_str().expect("token")));

    let code = outbox.last_code().await;
    let response = app
        .clone()
        .oneshot(call(
            json!({"method": "login", "args": ["root@example.com", code], "version": 2}),
            Some(&cookie_pair(&challenge_cookie)),
        ))
        .await
        .expect("login");
    let session_cookie = set_cookie(&response).expect("session cookie");
    let outcome = json_body(response).await;
    assert_eq!(outcome["success"], json!(true));
    assert_ne!(cookie_pair(&session_cookie), cookie_pair(&challenge_cookie));

    let response = app
        .clone()
        .oneshot(call(
            json!({"method": "check_user", "args": [], "version": 2}),
            Some(&cookie_pair(&session_cookie)),
        ))
        .await
        .expect("check_user");
    let status = json_body(response).await;
    assert_eq!(status["authenticated"], json!(true));
    assert_eq!(status["user"], json!("root@example.com"));
    assert!(status["capabilities"]
        .as_array()
        .expect("caps")
        .contains(&json!("accountmanager")));

    let response = app
        .clone()
        .oneshot(call(
            json!({"method": "get_all_users", "args": [], "version": 2}),
            Some(&cookie_pair(&session_cookie)),
        ))
        .await
        .expect("get_all_users");
    let users = json_body(response).await;
    assert_eq!(users[0]["username"], json!("root@example.com"));

    let response = app
        .clone()
        .oneshot(call(
            json!({"method": "logoff", "args": [], "version": 2}),
            Some(&cookie_pair(&session_cookie)),
        ))
        .await
        .expect("logoff");
    let cleared = set_cookie(&response).expect("cleared cookie");
    assert!(cleared.starts_with("token=;"));
    assert!(cleared.contains("Max-Age=0"));

    let response = app
        .oneshot(call(
            json!({"method": "check_user", "args": [], "version": 2}),
            Some(&cookie_pair(&session_cookie)),
        ))
        .await
        .expect("check_user");
    assert_eq!(json_body(response).await["authenticated"], json!(false));
}

#[tokio::test]
async fn envelope_token_authenticates_without_cookie() {
    let (app, outbox) = test_app(CookieSettings::default()).await;

    let response = app
        .clone()
        .oneshot(call(
            json!({"method": "send_otp", "args": ["bob@example.com"], "version": 2}),
            None,
        ))
        .await
        .expect("send_otp");
    let challenge = json_body(response).await;
    let code = outbox.last_code().await;

    let response = app
        .clone()
        .oneshot(call(
            json!({
                "method": "login",
                "kwargs": {"user": "bob@example.com", "otp": code},
                "version": 2,
                "token": challenge,
            }),
            None,
        ))
        .await
        .expect("login");
    let outcome = json_body(response).await;
    let token = outcome["token"].as_str().expect("session token").to_string();

    let response = app
        .oneshot(call(
            json!({"method": "getDetails", "version": 2, "token": token}),
            Some("token=stale"),
        ))
        .await
        .expect("details");
    assert_eq!(json_body(response).await["user"], json!("bob@example.com"));
}

#[tokio::test]
async fn secure_cookie_flag_and_name_are_configurable() {
    let (app, _outbox) = test_app(CookieSettings {
        name: "sid".into(),
        path: "/app".into(),
        secure: true,
    })
    .await;
    let response = app
        .oneshot(call(
            json!({"method": "send_otp", "args": ["bob@example.com"], "version": 2}),
            None,
        ))
        .await
        .expect("send_otp");
    let cookie = set_cookie(&response).expect("cookie");
    assert!(cookie.starts_with("sid="));
    assert!(cookie.contains("Path=/app"));
    assert!(cookie.ends_with("; Secure"));
}

#[tokio::test]
async fn envelope_token_key_follows_cookie_name() {
    let (app, outbox) = test_app(CookieSettings {
        name: "sid".into(),
        ..CookieSettings::default()
    })
    .await;

    let response = app
        .clone()
        .oneshot(call(
            json!({"method": "send_otp", "args": ["bob@example.com"], "version": 2}),
            None,
        ))
        .await
        .expect("send_otp");
    let challenge = json_body(response).await;
    let code = outbox.last_code().await;

    let response = app
        .clone()
        .oneshot(call(
            json!({
                "method": "login",
                "args": ["bob@example.com", code],
                "version": 2,
                "sid": challenge,
            }),
            None,
        ))
        .await
        .expect("login");
    let token = json_body(response).await["token"]
        .as_str()
        .expect("session token")
        .to_string();

    let response = app
        .clone()
        .oneshot(call(
            json!({"method": "check_user", "version": 2, "sid": token}),
            None,
        ))
        .await
        .expect("check_user");
    assert_eq!(json_body(response).await["user"], json!("bob@example.com"));

    let response = app
        .oneshot(call(
            json!({"method": "check_user", "version": 2, "token": token}),
            None,
        ))
        .await
        .expect("check_user");
    assert_eq!(json_body(response).await["authenticated"], json!(false));
}

#[test]
fn envelope_parsing_reads_configured_token_key() {
    let body = json!({"method": "check_user", "sid": "abc", "token": "other"}).to_string();
    let (request, token) = parse_envelope(body.as_bytes(), "sid").expect("envelope");
    assert_eq!(request.method, "check_user");
    assert_eq!(token.as_deref(), Some("abc"));

    let (_, token) = parse_envelope(body.as_bytes(), "token").expect("envelope");
    assert_eq!(token.as_deref(), Some("other"));
    assert!(parse_envelope(b"[1, 2]", "token").is_err());
}

#[test]
fn cookie_value_finds_named_pair() {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_static("theme=dark; token=abc; other=1"),
    );
    assert_eq!(cookie_value(&headers, "token").as_deref(), Some("abc"));
    assert_eq!(cookie_value(&headers, "missing"), None);
}
