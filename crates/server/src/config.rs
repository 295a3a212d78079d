use std::{collections::BTreeMap, fs};

use serde::Deserialize;

use crate::session::SessionSettings;

pub const DEFAULT_RPC_PATH: &str = "/spa-api";
pub const DEFAULT_COOKIE_NAME: &str = "token";

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub path: String,
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.into(),
            path: "/".into(),
            secure: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailgunSettings {
    pub domain: String,
    pub api_key: String,
    pub sender: String,
}

#[derive(Debug)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub rpc_path: String,
    pub default_capability: Option<String>,
    pub cookie: CookieSettings,
    pub session: SessionSettings,
    /// Log outgoing email instead of sending it.
    pub print_debug: bool,
    pub mailgun: Option<MailgunSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/server.db".into(),
            rpc_path: DEFAULT_RPC_PATH.into(),
            default_capability: None,
            cookie: CookieSettings::default(),
            session: SessionSettings::default(),
            print_debug: true,
            mailgun: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_addr: Option<String>,
    database_url: Option<String>,
    rpc_path: Option<String>,
    default_capability: Option<String>,
    cookie_name: Option<String>,
    cookie_path: Option<String>,
    secure_cookies: Option<bool>,
    default_role: Option<String>,
    roles: Option<BTreeMap<String, Vec<String>>>,
    admin_user: Option<String>,
    admin_email: Option<String>,
    token_digest_key: Option<String>,
    otp_rounds: Option<u32>,
    otp_ttl_seconds: Option<i64>,
    print_debug: Option<bool>,
    mailgun_domain: Option<String>,
    mailgun_key: Option<String>,
    mailgun_sender: Option<String>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        match toml::from_str::<FileConfig>(&raw) {
            Ok(file_cfg) => apply_file_config(&mut settings, file_cfg),
            Err(error) => tracing::warn!(%error, "ignoring malformed server.toml"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_config(settings: &mut Settings, file_cfg: FileConfig) {
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.rpc_path {
        settings.rpc_path = v;
    }
    if file_cfg.default_capability.is_some() {
        settings.default_capability = file_cfg.default_capability;
    }
    if let Some(v) = file_cfg.cookie_name {
        settings.cookie.name = v;
    }
    if let Some(v) = file_cfg.cookie_path {
        settings.cookie.path = v;
    }
    if let Some(v) = file_cfg.secure_cookies {
        settings.cookie.secure = v;
    }
    if let Some(v) = file_cfg.default_role {
        settings.session.default_role = v;
    }
    if let Some(v) = file_cfg.roles {
        settings.session.roles = v;
    }
    if file_cfg.admin_user.is_some() {
        settings.session.admin_user = file_cfg.admin_user;
    }
    if let Some(v) = file_cfg.admin_email {
        settings.session.admin_email = v;
    }
    if let Some(v) = file_cfg.token_digest_key {
        settings.session.token_digest_key = v;
    }
    if let Some(v) = file_cfg.otp_rounds {
        settings.session.otp_rounds = v;
    }
    if let Some(v) = file_cfg.otp_ttl_seconds {
        settings.session.otp_ttl_seconds = v;
    }
    if let Some(v) = file_cfg.print_debug {
        settings.print_debug = v;
    }
    if let (Some(domain), Some(api_key)) = (file_cfg.mailgun_domain, file_cfg.mailgun_key) {
        settings.mailgun = Some(MailgunSettings {
            domain,
            api_key,
            sender: file_cfg.mailgun_sender.unwrap_or_else(|| "noreply".into()),
        });
    }
}

fn apply_env_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = var("APP__RPC_PATH") {
        settings.rpc_path = v;
    }
    if let Some(v) = var("APP__SECURE_COOKIES") {
        settings.cookie.secure = parse_flag(&v);
    }
    if let Some(v) = var("APP__ADMIN_USER") {
        settings.session.admin_user = Some(v);
    }
    if let Some(v) = var("APP__ADMIN_EMAIL") {
        settings.session.admin_email = v;
    }
    if let Some(v) = var("APP__TOKEN_DIGEST_KEY") {
        settings.session.token_digest_key = v;
    }
    if let Some(v) = var("APP__OTP_ROUNDS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.session.otp_rounds = parsed;
        }
    }
    if let Some(v) = var("APP__PRINT_DEBUG") {
        settings.print_debug = parse_flag(&v);
    }

    if let Some(api_key) = var("MAILGUN_KEY").or_else(|| var("APP__MAILGUN_KEY")) {
        let existing = settings.mailgun.take();
        let domain = var("APP__MAILGUN_DOMAIN")
            .or_else(|| existing.as_ref().map(|m| m.domain.clone()));
        if let Some(domain) = domain {
            settings.mailgun = Some(MailgunSettings {
                domain,
                api_key,
                sender: var("APP__MAILGUN_SENDER")
                    .or_else(|| existing.map(|m| m.sender))
                    .unwrap_or_else(|| "noreply".into()),
            });
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Turns a bare path or `sqlite:` path into a `sqlite://` url. Windows
/// separators are rewritten so the url parses.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
