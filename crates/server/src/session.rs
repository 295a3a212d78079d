use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use shared::domain::{
    LoginOutcome, SessionStatus, UserRecord, ACCOUNT_MANAGER_CAPABILITY, ROOT_ROLE,
};
use storage::Storage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::{Authenticator, CallArgs, CallContext, RpcService},
    mailer::Mailer,
};

type HmacSha256 = Hmac<Sha256>;

pub const INVALID_CODE: &str = "Code is Invalid";
pub const DEFAULT_TOKEN_DIGEST_KEY: &str =
    "15d87f6ace820249cb0473df6ce51af6ca0a4721be09ad7fe91d9e644abfcc36";
pub const DEFAULT_OTP_ROUNDS: u32 = 100_000;
pub const DEFAULT_OTP_TTL_SECONDS: i64 = 600;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_role: String,
    /// Role name to the roles it includes.
    pub roles: BTreeMap<String, Vec<String>>,
    pub admin_user: Option<String>,
    pub admin_email: String,
    pub token_digest_key: String,
    pub otp_rounds: u32,
    pub otp_ttl_seconds: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(
            ROOT_ROLE.to_string(),
            vec![ACCOUNT_MANAGER_CAPABILITY.to_string(), "user".to_string()],
        );
        roles.insert(ACCOUNT_MANAGER_CAPABILITY.to_string(), Vec::new());
        roles.insert("user".to_string(), Vec::new());
        Self {
            default_role: "user".into(),
            roles,
            admin_user: None,
            admin_email: "admin@localhost".into(),
            token_digest_key: DEFAULT_TOKEN_DIGEST_KEY.into(),
            otp_rounds: DEFAULT_OTP_ROUNDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
        }
    }
}

pub struct EmailSessionManager {
    storage: Storage,
    mailer: Arc<dyn Mailer>,
    roles: BTreeMap<String, BTreeSet<String>>,
    default_role: String,
    admin_email: String,
    token_digest_key: Vec<u8>,
    otp_rounds: u32,
    otp_ttl: Duration,
}

impl EmailSessionManager {
    pub fn new(storage: Storage, mailer: Arc<dyn Mailer>, settings: &SessionSettings) -> Self {
        Self {
            storage,
            mailer,
            roles: flatten_roles(&settings.roles),
            default_role: settings.default_role.clone(),
            admin_email: settings.admin_email.clone(),
            token_digest_key: settings.token_digest_key.as_bytes().to_vec(),
            otp_rounds: settings.otp_rounds,
            otp_ttl: Duration::seconds(settings.otp_ttl_seconds),
        }
    }

    pub async fn bootstrap_admin(&self, admin_user: Option<&str>) -> Result<()> {
        match admin_user.map(str::trim).filter(|u| !u.is_empty()) {
            Some(admin) => {
                self.register_user(admin, ROOT_ROLE).await?;
                info!(%admin, "admin account ensured");
            }
            None => debug!("no admin account configured"),
        }
        Ok(())
    }

    pub fn register(self: &Arc<Self>, service: &mut RpcService) {
        let manager = ACCOUNT_MANAGER_CAPABILITY;

        self.expose(service, "send_otp", None, |m, ctx, args| async move {
            let username: String = args.get(0, "username")?;
            anyhow::Ok(json!(m.send_otp(&ctx, &username).await?))
        });
        self.expose(service, "login", None, |m, ctx, args| async move {
            let user: String = args.get(0, "user")?;
            let otp: String = args.get(1, "otp")?;
            anyhow::Ok(json!(m.login(&ctx, &user, &otp).await?))
        });
        self.expose(service, "logoff", None, |m, ctx, _| async move {
            m.logoff(&ctx).await?;
            anyhow::Ok(Value::Null)
        });
        self.expose(service, "logoff_all", None, |m, ctx, _| async move {
            m.logoff_all(&ctx).await?;
            anyhow::Ok(Value::Null)
        });
        self.expose(service, "check_user", None, |m, ctx, _| async move {
            anyhow::Ok(json!(m.check_user(&ctx)))
        });

        self.expose(service, "get_user", Some(manager), |m, _, args| async move {
            let username: String = args.get(0, "username")?;
            anyhow::Ok(json!(m.get_user(&username).await?))
        });
        self.expose(service, "register_user", Some(manager), |m, _, args| async move {
            let username: String = args.get(0, "username")?;
            let role: String = args.get(1, "role")?;
            m.register_user(&username, &role).await?;
            anyhow::Ok(Value::Null)
        });
        self.expose(service, "set_user_role", Some(manager), |m, _, args| async move {
            let username: String = args.get(0, "username")?;
            let role: String = args.get(1, "role")?;
            m.set_user_role(&username, &role).await?;
            anyhow::Ok(Value::Null)
        });
        self.expose(service, "list_roles", Some(manager), |m, _, _| async move {
            anyhow::Ok(json!(m.list_roles()))
        });
        self.expose(service, "get_all_users", Some(manager), |m, _, _| async move {
            anyhow::Ok(json!(m.storage.list_users().await?))
        });
    }

    fn expose<F, Fut>(
        self: &Arc<Self>,
        service: &mut RpcService,
        name: &str,
        capability: Option<&str>,
        method: F,
    ) where
        F: Fn(Arc<Self>, CallContext, CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        service.add_with_capability(name, capability, move |ctx, args| {
            method(Arc::clone(&manager), ctx, args)
        });
    }

    /// The challenge token doubles as the caller's session token until `login`.
    pub async fn send_otp(&self, ctx: &CallContext, username: &str) -> Result<String> {
        let username = normalize_username(username);
        let user = self.ensure_user(&username).await?;

        let token = random_token();
        let otp = random_otp();
        let expires_at = Utc::now() + self.otp_ttl;
        self.storage
            .insert_challenge(
                user.id,
                &self.token_digest(&token)?,
                &self.otp_digest(&otp, &token),
                expires_at,
            )
            .await?;
        ctx.set_token(Some(token.clone()));

        let text = format!(
            "Please enter the code {otp} to login.\n\nOnly one attempt is permitted. \
             Codes expire after {} minutes. If you are being spammed by this address, \
             email {}",
            self.otp_ttl.num_minutes(),
            self.admin_email
        );
        self.mailer
            .send(&username, "Email Login Code", &text)
            .await
            .with_context(|| format!("failed to email login code to {username}"))?;
        info!(user = %username, ip = ?ctx.ip, "login code sent");
        Ok(token)
    }

    pub async fn login(
        &self,
        ctx: &CallContext,
        username: &str,
        otp: &str,
    ) -> Result<LoginOutcome> {
        let username = normalize_username(username);
        let challenge_token = ctx.token().unwrap_or_default();

        let challenge = self
            .storage
            .take_challenge(&self.token_digest(&challenge_token)?, &username, Utc::now())
            .await?;
        let authorized = challenge
            .is_some_and(|c| c.otp_digest == self.otp_digest(otp, &challenge_token));
        if !authorized {
            warn!(user = %username, ip = ?ctx.ip, "login code rejected");
            return Ok(LoginOutcome::rejected(INVALID_CODE));
        }

        let token = self.issue_session_token(&username).await?;
        ctx.set_token(Some(token.clone()));
        info!(user = %username, "login succeeded");
        Ok(LoginOutcome::accepted(token))
    }

    pub async fn logoff(&self, ctx: &CallContext) -> Result<()> {
        if let Some(token) = ctx.token() {
            let removed = self.storage.delete_token(&self.token_digest(&token)?).await?;
            debug!(user = ?ctx.user, removed, "session closed");
        }
        ctx.set_token(None);
        Ok(())
    }

    pub async fn logoff_all(&self, ctx: &CallContext) -> Result<()> {
        let username = ctx
            .user
            .as_deref()
            .ok_or_else(|| anyhow!("logoff_all requires a logged in user"))?;
        let user = self
            .storage
            .get_user(username)
            .await?
            .ok_or_else(|| anyhow!("user '{username}' no longer exists"))?;
        let removed = self.storage.delete_tokens_for_user(user.id).await?;
        ctx.set_token(None);
        info!(user = %username, removed, "all sessions closed");
        Ok(())
    }

    pub fn check_user(&self, ctx: &CallContext) -> SessionStatus {
        SessionStatus {
            authenticated: ctx.user.is_some(),
            user: ctx.user.clone(),
            capabilities: ctx.capabilities.iter().cloned().collect(),
        }
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<UserRecord>> {
        self.storage.get_user(&normalize_username(username)).await
    }

    pub async fn register_user(&self, username: &str, role: &str) -> Result<()> {
        let username = normalize_username(username);
        if username.is_empty() {
            return Ok(());
        }
        if self.storage.create_user(&username, role).await?.is_some() {
            info!(user = %username, %role, "user registered");
        }
        Ok(())
    }

    pub async fn set_user_role(&self, username: &str, role: &str) -> Result<()> {
        let username = normalize_username(username);
        if !self.storage.set_user_role(&username, role).await? {
            debug!(user = %username, "role change for unknown user ignored");
        }
        Ok(())
    }

    pub fn list_roles(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    async fn ensure_user(&self, username: &str) -> Result<UserRecord> {
        let username = normalize_username(username);
        if let Some(user) = self.storage.get_user(&username).await? {
            return Ok(user);
        }
        self.register_user(&username, &self.default_role).await?;
        match self.storage.get_user(&username).await? {
            Some(user) => Ok(user),
            None => bail!("cannot register user '{username}'"),
        }
    }

    async fn issue_session_token(&self, username: &str) -> Result<String> {
        let user = self.ensure_user(username).await?;
        let token = random_token();
        self.storage
            .insert_token(user.id, &self.token_digest(&token)?)
            .await?;
        Ok(token)
    }

    fn token_digest(&self, token: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.token_digest_key)
            .map_err(|e| anyhow!("invalid token digest key: {e}"))?;
        mac.update(token.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn otp_digest(&self, otp: &str, challenge_token: &str) -> String {
        let mut out = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            otp.as_bytes(),
            challenge_token.as_bytes(),
            self.otp_rounds,
            &mut out,
        );
        hex::encode(out)
    }
}

#[async_trait]
impl Authenticator for EmailSessionManager {
    async fn user_for_token(&self, token: &str) -> Result<Option<String>> {
        self.storage
            .username_for_token(&self.token_digest(token)?)
            .await
    }

    async fn capabilities(&self, user: &str) -> Result<BTreeSet<String>> {
        let Some(record) = self.storage.get_user(user).await? else {
            return Ok(BTreeSet::new());
        };
        Ok(self.roles.get(&record.role).cloned().unwrap_or_default())
    }
}

/// Cycles stop at the first revisit.
pub fn flatten_roles(
    roles: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, BTreeSet<String>> {
    roles
        .keys()
        .map(|role| {
            let mut visited = BTreeSet::new();
            (role.clone(), expand_role(roles, role, &mut visited))
        })
        .collect()
}

fn expand_role(
    roles: &BTreeMap<String, Vec<String>>,
    role: &str,
    visited: &mut BTreeSet<String>,
) -> BTreeSet<String> {
    let mut flat = BTreeSet::from([role.to_string()]);
    let Some(included) = roles.get(role) else {
        return flat;
    };
    if !visited.insert(role.to_string()) {
        return flat;
    }
    for inner in included {
        flat.extend(expand_role(roles, inner, visited));
    }
    flat
}

pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// 64 hex characters of v4 randomness.
fn random_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn random_otp() -> String {
    hex::encode(&Uuid::new_v4().as_bytes()[..3])
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
