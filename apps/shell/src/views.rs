use std::sync::Arc;

use anyhow::{Context, Result};
use router::{encode, NavigationState, Navigator, Params, Renderer, Router, ViewRequest};
use shared::domain::{SessionStatus, ACCOUNT_MANAGER_CAPABILITY};
use tracing::info;

use crate::{render::Document, state::AppState};

type Request = ViewRequest<AppState>;

pub fn build_router(
    state: Arc<AppState>,
    renderer: Arc<dyn Renderer<Document>>,
    navigator: Navigator,
) -> Router<AppState, Document> {
    let mut router = Router::new(state, renderer, navigator, home);
    router.register_view("login", login);
    router.register_view("login_confirm", login_confirm);
    router.register_view("logoff", logoff);
    router.register_view("logoff_all", logoff_all);
    router.register_view("manage_users", manage_users);
    router
}

fn fragment(view: &str, params: &[(&str, &str)]) -> String {
    let state = params
        .iter()
        .fold(NavigationState::new(view), |state, (k, v)| {
            state.with_param(*k, *v)
        });
    encode(&state)
}

fn single_param(key: &str, value: &str) -> Params {
    Params::from([(key.to_string(), value.to_string())])
}

fn account_tools(doc: Document, session: &SessionStatus) -> Document {
    let doc = doc.line("").line("Account");
    match session.user.as_deref().filter(|_| session.authenticated) {
        Some(user) => {
            let doc = doc
                .line(format!("Welcome, {user}!"))
                .link("Log Off", fragment("logoff", &[]))
                .link("Log Off All Browsers", fragment("logoff_all", &[]));
            if session.has_capability(ACCOUNT_MANAGER_CAPABILITY) {
                doc.link("Manage Users", fragment("manage_users", &[]))
            } else {
                doc
            }
        }
        None => doc
            .line("You are not logged in.")
            .link("log in", fragment("login", &[])),
    }
}

pub async fn home(req: Request) -> Result<Document> {
    let session = req.state.session().await;
    let doc = Document::new("Main Page").line(
        "Welcome! This shell signs in by email code and shows what your role allows.",
    );
    Ok(account_tools(doc, &session))
}

pub async fn login(req: Request) -> Result<Document> {
    let Some(email) = req.param("email").filter(|e| !e.trim().is_empty()) else {
        return Ok(Document::new("Login")
            .line("Please enter your email address to proceed.")
            .line(format!("Type: {}", fragment("login", &[("email", "you@example.com")]))));
    };

    let challenge = req
        .state
        .api
        .send_otp(email)
        .await
        .context("failed to request a login code")?;
    req.state.api.client().set_token(Some(challenge)).await;
    info!(%email, "login code requested");

    req.navigator
        .navigate("login_confirm", single_param("email", email));
    Ok(Document::new("Login").line(format!("A login code was sent to {email}.")))
}

pub async fn login_confirm(req: Request) -> Result<Document> {
    let email = req.param("email").unwrap_or_default().to_string();
    let Some(code) = req.param("code").filter(|c| !c.trim().is_empty()) else {
        return Ok(Document::new("Login")
            .line("You should have received an email with a single-use login code.")
            .line(format!("Email Address: {email}"))
            .line(format!(
                "Type: {}",
                fragment("login_confirm", &[("email", email.as_str()), ("code", "XXXXXX")])
            )));
    };

    let outcome = req
        .state
        .api
        .login(&email, code.trim())
        .await
        .context("login call failed")?;
    if !outcome.success {
        return Ok(Document::new("Login")
            .line(outcome.error.unwrap_or_else(|| "Login failed.".into()))
            .link("try again", fragment("login", &[("email", email.as_str())])));
    }

    req.state.api.client().set_token(outcome.token).await;
    let session = req.state.refresh_session().await?;
    req.navigator.navigate("", Params::new());
    Ok(account_tools(Document::new("Login"), &session))
}

pub async fn logoff(req: Request) -> Result<Document> {
    req.state.api.logoff().await.context("logoff failed")?;
    signed_out(req, "Logged off.").await
}

pub async fn logoff_all(req: Request) -> Result<Document> {
    req.state.api.logoff_all().await.context("logoff_all failed")?;
    signed_out(req, "Logged off everywhere.").await
}

async fn signed_out(req: Request, message: &str) -> Result<Document> {
    req.state.api.client().set_token(None).await;
    let session = req.state.refresh_session().await?;
    req.navigator.navigate("", Params::new());
    Ok(account_tools(Document::new("Account").line(message), &session))
}

/// Lists users and roles. `add=<email>&role=<role>` registers a user and
/// `set=<email>&role=<role>` changes one.
pub async fn manage_users(req: Request) -> Result<Document> {
    let allowed = req
        .state
        .api
        .has_capability(ACCOUNT_MANAGER_CAPABILITY)
        .await
        .context("hasCapability failed")?;
    if !allowed {
        return Ok(Document::new("Manage Users")
            .line("You are not allowed to manage users.")
            .link("back", fragment("", &[])));
    }

    let api = &req.state.api;
    let role = req.param("role").unwrap_or_default();
    let mut doc = Document::new("Manage Users")
        .line("This page allows you to manage the user roles for this service.");
    if let Some(email) = req.param("add").filter(|e| !e.is_empty()) {
        api.register_user(email, role).await.context("register_user failed")?;
        doc = doc.line(format!("Added {email} as {role}."));
    }
    if let Some(email) = req.param("set").filter(|e| !e.is_empty()) {
        api.set_user_role(email, role).await.context("set_user_role failed")?;
        doc = doc.line(format!("Set {email} to {role}."));
    }

    let (users, roles) = tokio::try_join!(api.get_all_users(), api.list_roles())?;
    doc = doc.line("").line("User Listing");
    for user in &users {
        doc = doc.line(format!("  {:<40} {}", user.username, user.role));
    }
    Ok(doc
        .line("")
        .line(format!("Roles: {}", roles.join(", ")))
        .line(format!(
            "Type: {} or {}",
            fragment("manage_users", &[("add", "EMAIL"), ("role", "ROLE")]),
            fragment("manage_users", &[("set", "EMAIL"), ("role", "ROLE")]),
        )))
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
