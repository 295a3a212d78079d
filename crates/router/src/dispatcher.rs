use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::BoxFuture;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, error, info};

use crate::{
    codec::{decode, Params},
    navigation::{NavigationEvent, Navigator},
};

pub const DEFAULT_MOUNT_TARGET: &str = "root";

pub struct ViewRequest<S> {
    pub state: Arc<S>,
    /// Decoded view name; may name a view that fell back to the default.
    pub view: String,
    pub params: Params,
    pub navigator: Navigator,
}

impl<S> ViewRequest<S> {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

pub type ViewFuture<D> = BoxFuture<'static, anyhow::Result<D>>;

pub trait ViewHandler<S, D>: Send + Sync {
    fn call(&self, request: ViewRequest<S>) -> ViewFuture<D>;
}

impl<S, D, F, Fut> ViewHandler<S, D> for F
where
    F: Fn(ViewRequest<S>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<D>> + Send + 'static,
{
    fn call(&self, request: ViewRequest<S>) -> ViewFuture<D> {
        Box::pin((self)(request))
    }
}

pub trait Renderer<D>: Send + Sync {
    fn render(&self, document: D, target: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    #[default]
    DiscardStale,
    /// Render every document as it resolves; the slowest handler wins.
    LastResolvedWins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Rendered,
    Stale,
    Failed,
}

pub struct Router<S, D> {
    state: Arc<S>,
    renderer: Arc<dyn Renderer<D>>,
    navigator: Navigator,
    default_view: Arc<dyn ViewHandler<S, D>>,
    views: HashMap<String, Arc<dyn ViewHandler<S, D>>>,
    mount_target: String,
    stale_policy: StalePolicy,
    generation: AtomicU64,
}

impl<S, D> Router<S, D>
where
    S: Send + Sync + 'static,
    D: Send + 'static,
{
    pub fn new(
        state: Arc<S>,
        renderer: Arc<dyn Renderer<D>>,
        navigator: Navigator,
        default_view: impl ViewHandler<S, D> + 'static,
    ) -> Self {
        Self {
            state,
            renderer,
            navigator,
            default_view: Arc::new(default_view),
            views: HashMap::new(),
            mount_target: DEFAULT_MOUNT_TARGET.to_string(),
            stale_policy: StalePolicy::default(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_mount_target(mut self, target: impl Into<String>) -> Self {
        self.mount_target = target.into();
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// The empty name replaces the default view.
    pub fn register_view(&mut self, name: &str, handler: impl ViewHandler<S, D> + 'static) {
        let handler: Arc<dyn ViewHandler<S, D>> = Arc::new(handler);
        if name.is_empty() {
            self.default_view = handler;
        } else if self.views.insert(name.to_string(), handler).is_some() {
            debug!(view = name, "replaced view handler");
        }
    }

    pub fn has_view(&self, name: &str) -> bool {
        name.is_empty() || self.views.contains_key(name)
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    fn handler_for(&self, view: &str) -> &Arc<dyn ViewHandler<S, D>> {
        self.views.get(view).unwrap_or(&self.default_view)
    }

    pub async fn dispatch(&self, fragment: &str) -> DispatchOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let nav = decode(fragment);
        debug!(view = %nav.view, generation, "dispatching");

        let handler = Arc::clone(self.handler_for(&nav.view));
        let request = ViewRequest {
            state: Arc::clone(&self.state),
            view: nav.view,
            params: nav.params,
            navigator: self.navigator.clone(),
        };

        let document = match handler.call(request).await {
            Ok(document) => document,
            Err(err) => {
                let message = format!("{err:#}");
                error!(%fragment, error = %message, "view handler failed");
                return DispatchOutcome::Failed;
            }
        };

        if self.stale_policy == StalePolicy::DiscardStale {
            let latest = self.generation.load(Ordering::SeqCst);
            if latest != generation {
                debug!(%fragment, generation, latest, "discarding stale render");
                return DispatchOutcome::Stale;
            }
        }

        self.renderer.render(document, &self.mount_target);
        DispatchOutcome::Rendered
    }

    /// Returns once the event channel closes and in-flight dispatches settle.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<NavigationEvent>) {
        let mut in_flight = JoinSet::new();
        info!(mount_target = %self.mount_target, "router listening for navigation events");
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let fragment = match event {
                        NavigationEvent::Load => self.navigator.current(),
                        NavigationEvent::FragmentChanged(fragment) => fragment,
                    };
                    let router = Arc::clone(&self);
                    in_flight.spawn(async move { router.dispatch(&fragment).await });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
        while in_flight.join_next().await.is_some() {}
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
