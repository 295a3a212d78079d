use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::{encode, NavigationState, Params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    Load,
    FragmentChanged(String),
}

#[derive(Debug, Clone)]
pub struct Navigator {
    fragment: Arc<Mutex<String>>,
    events: mpsc::UnboundedSender<NavigationEvent>,
}

pub fn navigation_channel(
    initial_fragment: impl Into<String>,
) -> (Navigator, mpsc::UnboundedReceiver<NavigationEvent>) {
    let (events, rx) = mpsc::unbounded_channel();
    let navigator = Navigator {
        fragment: Arc::new(Mutex::new(initial_fragment.into())),
        events,
    };
    (navigator, rx)
}

impl Navigator {
    pub fn current(&self) -> String {
        self.fragment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_state(&self) -> NavigationState {
        crate::codec::decode(&self.current())
    }

    /// Emits nothing and returns `false` when the fragment is already current.
    pub fn navigate(&self, view: &str, params: Params) -> bool {
        let state = NavigationState {
            view: view.to_string(),
            params,
        };
        self.set_fragment(encode(&state))
    }

    pub fn set_fragment(&self, fragment: impl Into<String>) -> bool {
        let fragment = fragment.into();
        {
            let mut current = self.fragment.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == fragment {
                return false;
            }
            current.clone_from(&fragment);
        }
        self.emit(NavigationEvent::FragmentChanged(fragment));
        true
    }

    pub fn refresh(&self) {
        self.emit(NavigationEvent::FragmentChanged(self.current()));
    }

    pub fn load(&self) {
        self.emit(NavigationEvent::Load);
    }

    fn emit(&self, event: NavigationEvent) {
        if self.events.send(event).is_err() {
            debug!("navigation event dropped; no dispatcher is listening");
        }
    }
}

#[cfg(test)]
#[path = "tests/navigation_tests.rs"]
mod tests;
