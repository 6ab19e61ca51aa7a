//! Registry of running chaincode handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::warn;

use crate::{
    error::{ExternalError, HandlerError},
    handler::{Handler, Registry},
};

/// Outcome slot a launcher blocks on while its chaincode connects and
/// registers. Resolved exactly once, by [`Registry::ready`] or
/// [`Registry::failed`].
#[derive(Default)]
pub struct LaunchState {
    outcome: Mutex<Option<Result<(), ExternalError>>>,
    done: Notify,
}

impl LaunchState {
    /// Blocks until the launch resolves. Intended for a single waiter, the
    /// task driving the launch.
    pub async fn wait(&self) -> Result<(), HandlerError> {
        loop {
            if let Some(outcome) = self.outcome.lock().expect("lock poisoned").clone() {
                return outcome.map_err(HandlerError::External);
            }
            self.done.notified().await;
        }
    }

    /// Non-blocking view of the outcome, if resolved.
    pub fn outcome(&self) -> Option<Result<(), ExternalError>> {
        self.outcome.lock().expect("lock poisoned").clone()
    }

    fn resolve(&self, outcome: Result<(), ExternalError>) {
        let mut slot = self.outcome.lock().expect("lock poisoned");
        if slot.is_none() {
            *slot = Some(outcome);
            self.done.notify_one();
        }
    }
}

#[derive(Default)]
struct Inner {
    handlers: HashMap<String, Arc<Handler>>,
    launching: HashMap<String, Arc<LaunchState>>,
}

/// Tracks handlers by chaincode name and resolves launch waiters when a
/// chaincode becomes usable (or fails to).
#[derive(Default)]
pub struct HandlerRegistry {
    inner: Mutex<Inner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the intent to launch `name`. Returns the launch state and
    /// whether a launch was already in progress.
    pub fn launching(&self, name: &str) -> (Arc<LaunchState>, bool) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        match inner.launching.get(name) {
            Some(state) => (Arc::clone(state), true),
            None => {
                let state = Arc::new(LaunchState::default());
                inner.launching.insert(name.to_owned(), Arc::clone(&state));
                (state, false)
            }
        }
    }

    /// The registered handler for `name`, if any.
    pub fn handler(&self, name: &str) -> Option<Arc<Handler>> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .handlers
            .get(name)
            .cloned()
    }
}

impl Registry for HandlerRegistry {
    fn register(&self, handler: Arc<Handler>) -> Result<(), HandlerError> {
        let name = handler
            .chaincode_id()
            .map(|chaincode_id| chaincode_id.name)
            .unwrap_or_default();
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.handlers.contains_key(&name) {
            return Err(HandlerError::DuplicateChaincodeName(name));
        }
        inner.handlers.insert(name, handler);
        Ok(())
    }

    fn ready(&self, name: &str) {
        let state = self
            .inner
            .lock()
            .expect("lock poisoned")
            .launching
            .remove(name);
        if let Some(state) = state {
            state.resolve(Ok(()));
        }
    }

    fn failed(&self, name: &str, err: HandlerError) {
        let state = self
            .inner
            .lock()
            .expect("lock poisoned")
            .launching
            .remove(name);
        match state {
            Some(state) => state.resolve(Err(ExternalError::new(err.to_string()))),
            None => warn!(chaincode = name, %err, "launch failure for unknown chaincode"),
        }
    }

    fn deregister(&self, name: &str) -> Result<(), HandlerError> {
        let removed = self
            .inner
            .lock()
            .expect("lock poisoned")
            .handlers
            .remove(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(HandlerError::External(ExternalError::new(format!(
                "could not find handler: {}",
                name
            )))),
        }
    }
}
