use shared::domain::{LoginOutcome, SessionStatus, UserRecord};

use crate::{RpcClient, RpcError};

pub struct SessionApi {
    client: RpcClient,
}

impl SessionApi {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub async fn check_user(&self) -> Result<SessionStatus, RpcError> {
        self.client.call_with("check_user", ()).await
    }

    pub async fn has_capability(&self, capability: &str) -> Result<bool, RpcError> {
        self.client.call_with("hasCapability", (capability,)).await
    }

    pub async fn send_otp(&self, email: &str) -> Result<String, RpcError> {
        self.client.call_with("send_otp", (email,)).await
    }

    pub async fn login(&self, email: &str, code: &str) -> Result<LoginOutcome, RpcError> {
        self.client.call_with("login", (email, code)).await
    }

    pub async fn logoff(&self) -> Result<(), RpcError> {
        self.client.call_with("logoff", ()).await
    }

    pub async fn logoff_all(&self) -> Result<(), RpcError> {
        self.client.call_with("logoff_all", ()).await
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<UserRecord>, RpcError> {
        self.client.call_with("get_user", (username,)).await
    }

    pub async fn register_user(&self, username: &str, role: &str) -> Result<(), RpcError> {
        self.client.call_with("register_user", (username, role)).await
    }

    pub async fn set_user_role(&self, username: &str, role: &str) -> Result<(), RpcError> {
        self.client.call_with("set_user_role", (username, role)).await
    }

    pub async fn list_roles(&self) -> Result<Vec<String>, RpcError> {
        self.client.call_with("list_roles", ()).await
    }

    pub async fn get_all_users(&self) -> Result<Vec<UserRecord>, RpcError> {
        self.client.call_with("get_all_users", ()).await
    }
}
