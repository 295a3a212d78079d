use client_core::{RpcError, SessionApi};
use shared::domain::SessionStatus;
use tokio::sync::RwLock;
use tracing::debug;

/// Shared by every view. The cached session only changes through
/// [`AppState::refresh_session`].
pub struct AppState {
    pub api: SessionApi,
    session: RwLock<SessionStatus>,
}

impl AppState {
    pub fn new(api: SessionApi) -> Self {
        Self {
            api,
            session: RwLock::new(SessionStatus::default()),
        }
    }

    pub async fn session(&self) -> SessionStatus {
        self.session.read().await.clone()
    }

    pub async fn refresh_session(&self) -> Result<SessionStatus, RpcError> {
        let status = self.api.check_user().await?;
        debug!(user = ?status.user, authenticated = status.authenticated, "session refreshed");
        *self.session.write().await = status.clone();
        Ok(status)
    }
}
