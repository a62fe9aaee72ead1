//! Single-flight token refresh.
//!
//! The first request that finds the access token expired starts the refresh
//! on its own task. Every request, the one that started it included, parks a
//! `oneshot` sender in the queue and is woken with the outcome, so cancelling
//! any one request never fails the others.

use super::error::ClientError;
use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::oneshot;
use tracing::debug;

type Waiter = oneshot::Sender<Result<String, String>>;

const ABANDONED_MESSAGE: &str = "Token refresh was abandoned";

#[derive(Debug, Default)]
struct RefreshState {
    refreshing: bool,
    waiters: Vec<Waiter>,
}

/// The refreshing flag and the queue share one lock that is never held across
/// an await point.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    /// Resolve a fresh access token, spawning `refresh` only if no other
    /// refresh is in flight.
    ///
    /// # Errors
    /// Returns `ClientError::RefreshFailed` when the refresh failed or its
    /// task died before settling.
    pub async fn access_token<F, Fut>(self: &Arc<Self>, refresh: F) -> Result<String, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ClientError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let lead = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.waiters.push(tx);
            !std::mem::replace(&mut state.refreshing, true)
        };

        if lead {
            let refresh = refresh();
            let mut leadership = Leadership {
                coordinator: Arc::clone(self),
                settled: false,
            };
            tokio::spawn(async move {
                let outcome = refresh.await;
                leadership.settle(outcome.map_err(|err| match err {
                    ClientError::RefreshFailed(message) => message,
                    other => other.to_string(),
                }));
            });
        } else {
            debug!("Waiting for token refresh in flight");
        }

        match rx.await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(message)) => Err(ClientError::RefreshFailed(message)),
            Err(_) => Err(ClientError::RefreshFailed(ABANDONED_MESSAGE.to_string())),
        }
    }

    /// Number of requests waiting on the current refresh.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .len()
    }

    fn settle(&self, outcome: &Result<String, String>) {
        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };
        debug!("Token refresh settled, waking {} requests", waiters.len());
        for waiter in waiters {
            // a waiter whose request was dropped is gone already
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Settles the queue even if the refresh task panics or is dropped with the
/// runtime.
struct Leadership {
    coordinator: Arc<RefreshCoordinator>,
    settled: bool,
}

impl Leadership {
    fn settle(&mut self, outcome: Result<String, String>) {
        self.settled = true;
        self.coordinator.settle(&outcome);
    }
}

impl Drop for Leadership {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(&Err(ABANDONED_MESSAGE.to_string()));
        }
    }
}
