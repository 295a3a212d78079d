use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde_json::Value;
use shared::protocol::RpcRequest;
use storage::Storage;
use tracing::{debug, error, info, warn};

mod api;
mod app_state;
mod config;
mod mailer;
mod session;

use api::RpcService;
use app_state::AppState;
use config::{load_settings, normalize_database_url, CookieSettings, Settings};
use mailer::{LogMailer, Mailer, MailgunMailer};
use session::EmailSessionManager;

const MAX_REQUEST_BYTES: usize = 1024 * 1024;
const COOKIE_LIFETIME_SECONDS: i64 = 31_557_600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = build_state(&settings, storage).await?;
    let app = build_router(&settings.rpc_path, Arc::new(state));

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.server_bind))?;
    info!(%addr, path = %settings.rpc_path, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn build_state(settings: &Settings, storage: Storage) -> anyhow::Result<AppState> {
    let mailer: Arc<dyn Mailer> = match (&settings.mailgun, settings.print_debug) {
        (Some(mailgun), false) => Arc::new(MailgunMailer::new(
            mailgun.domain.clone(),
            mailgun.api_key.clone(),
            mailgun.sender.clone(),
        )),
        (None, false) => {
            warn!("print_debug is off but no mailgun key is configured; login codes will only be logged");
            Arc::new(LogMailer)
        }
        (_, true) => Arc::new(LogMailer),
    };

    let sessions = Arc::new(EmailSessionManager::new(
        storage.clone(),
        mailer,
        &settings.session,
    ));
    sessions
        .bootstrap_admin(settings.session.admin_user.as_deref())
        .await?;

    let mut rpc = RpcService::new(sessions.clone(), settings.default_capability.clone());
    sessions.register(&mut rpc);
    info!(methods = rpc.method_names().len(), "rpc methods registered");

    Ok(AppState {
        rpc: Arc::new(rpc),
        storage,
        cookie: settings.cookie.clone(),
    })
}

fn build_router(rpc_path: &str, state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(rpc_path, any(rpc_endpoint))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

/// JSON POSTs are calls; every other request gets the method list.
async fn rpc_endpoint(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::POST || !is_json(&headers) {
        return Json(state.rpc.method_names()).into_response();
    }
    if body.len() > MAX_REQUEST_BYTES {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
        )
            .into_response();
    }

    let (request, envelope_token) = match parse_envelope(&body, &state.cookie.name) {
        Ok(parsed) => parsed,
        Err(error) => {
            debug!(%error, "rejecting malformed rpc envelope");
            return (StatusCode::BAD_REQUEST, format!("invalid request: {error}")).into_response();
        }
    };

    let cookie_token = cookie_value(&headers, &state.cookie.name);
    let ctx = state
        .rpc
        .context_for(
            connect_info.map(|ConnectInfo(addr)| addr),
            envelope_token,
            cookie_token,
        )
        .await;
    let had_token = ctx.token().is_some();

    let result = state.rpc.handle(request, &ctx).await;

    let mut response = Json(result).into_response();
    let cookie = match ctx.token() {
        Some(token) => Some(session_cookie(&state.cookie, &token)),
        None if had_token => Some(expired_cookie(&state.cookie)),
        None => None,
    };
    if let Some(cookie) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// The envelope carries its session token under the cookie's name.
fn parse_envelope(
    body: &[u8],
    token_key: &str,
) -> serde_json::Result<(RpcRequest, Option<String>)> {
    let envelope: Value = serde_json::from_slice(body)?;
    let token = envelope
        .get(token_key)
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    Ok((serde_json::from_value(envelope)?, token))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn session_cookie(cookie: &CookieSettings, token: &str) -> String {
    let expires = Utc::now() + Duration::seconds(COOKIE_LIFETIME_SECONDS);
    let mut value = format!(
        "{}={token}; Expires={}; Max-Age={COOKIE_LIFETIME_SECONDS}; Path={}; HttpOnly",
        cookie.name,
        expires.format("%a, %d %b %Y %H:%M:%S GMT"),
        cookie.path,
    );
    if cookie.secure {
        value.push_str("; Secure");
    }
    value
}

fn expired_cookie(cookie: &CookieSettings) -> String {
    let mut value = format!(
        "{}=; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; Path={}; HttpOnly",
        cookie.name, cookie.path,
    );
    if cookie.secure {
        value.push_str("; Secure");
    }
    value
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
