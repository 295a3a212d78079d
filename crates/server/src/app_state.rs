use std::sync::Arc;

use storage::Storage;

use crate::{api::RpcService, config::CookieSettings};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) rpc: Arc<RpcService>,
    pub(crate) storage: Storage,
    pub(crate) cookie: CookieSettings,
}
