pub mod codec;
mod dispatcher;
mod navigation;

pub use codec::{decode, encode, NavigationState, Params};
pub use dispatcher::{
    DispatchOutcome, Renderer, Router, StalePolicy, ViewFuture, ViewHandler, ViewRequest,
    DEFAULT_MOUNT_TARGET,
};
pub use navigation::{navigation_channel, NavigationEvent, Navigator};
